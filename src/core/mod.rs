//! Core processing modules

pub mod date_chunks;
pub mod aggregate;
pub mod tabularize;
pub mod timezone;
pub mod localize;
pub mod bands;
pub mod pca;

// Re-export main types
pub use date_chunks::{chunk, parse_date, DateRanges};
pub use aggregate::{AggregateParams, AggregatedCollection, DatasetAggregator};
pub use tabularize::{provenance_id, strip_numeric_segments, to_rows};
pub use timezone::{TimezoneLookup, ZoneBoundaries};
pub use localize::{to_local_time, TemporalLocalizer};
pub use bands::{AugmentOptions, BandAugmenter, BandImage, SensorBands};
pub use pca::{PcaParams, PcaReducer, PcaResult};
