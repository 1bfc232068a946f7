//! opca: per-date remote-sensing feature tables and per-image PCA
//!
//! This library chunks a date range by year, aggregates the matching imagery
//! from an image-compute service into one provenance-tagged collection, turns
//! it into a feature table localized to each site's own timezone, and reduces
//! multi-band images to ordered principal components.

pub mod types;
pub mod config;
pub mod io;
pub mod core;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, DateChunk, FailurePolicy, FeatureRow, GeoPoint, Geometry, ImageRecord,
    LocalizedTime, OpcaError, OpcaResult,
};

pub use config::{ComputePlan, DatePlotPlan, OpcaConfig};
pub use io::{ImageCompute, LocalCatalog};
