//! Image-compute client seam.
//!
//! The aggregation, tabularisation and reduction stages only ever talk to an
//! [`ImageCompute`] implementation. [`LocalCatalog`] is the in-memory backend:
//! it holds image metadata (and optionally pixels) and executes the spatial
//! and temporal filters locally.

use crate::core::bands::BandImage;
use crate::types::{DateChunk, Geometry, ImageRecord, OpcaError, OpcaResult};
use chrono::{NaiveDate, NaiveTime};
use std::collections::BTreeMap;

/// Tag key holding the source dataset identifier
pub const SOURCE_TAG: &str = "source";
/// Tag key holding `sourceId/nativeId`
pub const PATH_TAG: &str = "syspath";

/// Materialised image feature: footprint plus the fixed property set
/// pulled into local memory
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry,
    pub native_id: String,
    pub source_id: Option<String>,
    pub path: Option<String>,
    pub time_start_ms: i64,
}

/// Capabilities consumed from an image-compute service
pub trait ImageCompute: Send + Sync {
    /// Images of `dataset_id` overlapping `aoi` and acquired inside `chunk`
    /// (start inclusive, end exclusive), in the service's native order
    fn query_images(
        &self,
        dataset_id: &str,
        aoi: &Geometry,
        chunk: &DateChunk,
    ) -> OpcaResult<Vec<ImageRecord>>;

    /// Pixel data for an image addressed by its `sourceId/nativeId` path
    fn fetch_image(&self, path: &str) -> OpcaResult<BandImage>;

    /// Pull geometry, id, provenance tags and acquisition time out of each image
    fn materialize_features(&self, images: &[ImageRecord]) -> OpcaResult<Vec<Feature>> {
        Ok(images
            .iter()
            .map(|image| Feature {
                geometry: image.geometry.clone(),
                native_id: image.native_id.clone(),
                source_id: image.tag(SOURCE_TAG).map(str::to_string),
                path: image.tag(PATH_TAG).map(str::to_string),
                time_start_ms: image.time_start_ms,
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    record: ImageRecord,
    pixels: Option<BandImage>,
}

/// In-memory image catalogue keyed by dataset identifier
#[derive(Debug, Clone, Default)]
pub struct LocalCatalog {
    datasets: BTreeMap<String, Vec<CatalogEntry>>,
}

impl LocalCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image; entries keep insertion order as their native order
    pub fn insert(&mut self, dataset_id: &str, record: ImageRecord, pixels: Option<BandImage>) {
        self.datasets
            .entry(dataset_id.to_string())
            .or_default()
            .push(CatalogEntry { record, pixels });
    }

    pub fn len(&self) -> usize {
        self.datasets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn day_start_ms(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

impl ImageCompute for LocalCatalog {
    fn query_images(
        &self,
        dataset_id: &str,
        aoi: &Geometry,
        chunk: &DateChunk,
    ) -> OpcaResult<Vec<ImageRecord>> {
        let entries = self
            .datasets
            .get(dataset_id)
            .ok_or_else(|| OpcaError::Query(format!("unknown dataset '{}'", dataset_id)))?;

        let start_ms = day_start_ms(chunk.start);
        let end_ms = day_start_ms(chunk.end);

        let images: Vec<ImageRecord> = entries
            .iter()
            .filter(|e| e.record.time_start_ms >= start_ms && e.record.time_start_ms < end_ms)
            .filter(|e| e.record.geometry.intersects(aoi))
            .map(|e| e.record.clone())
            .collect();

        log::debug!(
            "Query {} {}: {} of {} image(s) match",
            dataset_id,
            chunk,
            images.len(),
            entries.len()
        );
        Ok(images)
    }

    fn fetch_image(&self, path: &str) -> OpcaResult<BandImage> {
        let (dataset_id, native_id) = path
            .rsplit_once('/')
            .ok_or_else(|| OpcaError::Query(format!("'{}' is not a dataset/image path", path)))?;

        let entry = self
            .datasets
            .get(dataset_id)
            .and_then(|entries| entries.iter().find(|e| e.record.native_id == native_id))
            .ok_or_else(|| OpcaError::Query(format!("no image at '{}'", path)))?;

        let pixels = entry
            .pixels
            .as_ref()
            .ok_or_else(|| OpcaError::Query(format!("image '{}' has no pixel data", path)))?;

        Ok(pixels.clone().with_id(path))
    }
}
