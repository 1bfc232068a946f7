use crate::core::date_chunks::DateRanges;
use crate::io::compute::{ImageCompute, PATH_TAG, SOURCE_TAG};
use crate::types::{DateChunk, Geometry, ImageRecord, OpcaError, OpcaResult, DATE_FORMAT};
use chrono::{TimeZone, Utc};
use std::collections::{BTreeSet, HashSet};

/// Source and quality filter for one aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateParams {
    /// Dataset identifier, e.g. `COPERNICUS/S2_HARMONIZED`
    pub source_id: String,
    /// Per-image property compared against the threshold
    pub quality_property: String,
    /// Images with `quality_property <= quality_threshold` are kept
    pub quality_threshold: f64,
}

impl AggregateParams {
    pub fn new(source_id: impl Into<String>, quality_property: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            quality_property: quality_property.into(),
            quality_threshold: 0.0,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }
}

/// Provenance-tagged multiset of image records.
///
/// Membership is what matters; the iteration order (chunk order, then native
/// query order) is stable for one build but carries no meaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedCollection {
    images: Vec<ImageRecord>,
    /// Tag keys shared by every element; `None` until the first element arrives
    schema: Option<BTreeSet<String>>,
}

impl AggregatedCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap already-tagged records; all of them must carry the same tag keys
    pub fn from_records(images: Vec<ImageRecord>) -> OpcaResult<Self> {
        let schema = common_schema(&images)?;
        Ok(Self { images, schema })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImageRecord> {
        self.images.iter()
    }

    pub fn images(&self) -> &[ImageRecord] {
        &self.images
    }

    pub fn into_images(self) -> Vec<ImageRecord> {
        self.images
    }

    pub fn schema(&self) -> Option<&BTreeSet<String>> {
        self.schema.as_ref()
    }

    /// `sourceId/nativeId` paths of every element (native id when untagged)
    pub fn ids(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|i| i.tag(PATH_TAG).map(str::to_string).unwrap_or_else(|| i.native_id.clone()))
            .collect()
    }

    pub fn id_set(&self) -> HashSet<String> {
        self.ids().into_iter().collect()
    }

    /// Append `other`; both collections must share the same tag keys.
    /// An empty collection with no schema yet adopts the other's.
    pub fn merge(&mut self, other: AggregatedCollection) -> OpcaResult<()> {
        match (&self.schema, &other.schema) {
            (Some(mine), Some(theirs)) if mine != theirs => {
                return Err(OpcaError::IncompatibleCollection(format!(
                    "tag keys {:?} vs {:?}",
                    mine, theirs
                )));
            }
            (None, Some(_)) => self.schema = other.schema.clone(),
            _ => {}
        }
        log::debug!("Merging {} image(s) into {}", other.len(), self.len());
        self.images.extend(other.images);
        Ok(())
    }

    /// Apply a pure per-image transform, returning a new collection
    pub fn map<F>(&self, transform: F) -> OpcaResult<AggregatedCollection>
    where
        F: Fn(&ImageRecord) -> ImageRecord,
    {
        let images: Vec<ImageRecord> = self.images.iter().map(transform).collect();
        if images.is_empty() {
            return Ok(Self {
                images,
                schema: self.schema.clone(),
            });
        }
        Self::from_records(images)
    }

    /// Keep images whose `property` is present and `<= threshold`
    pub fn filter_by_property(&self, property: &str, threshold: f64) -> AggregatedCollection {
        let images: Vec<ImageRecord> = self
            .images
            .iter()
            .filter(|i| match i.property(property) {
                Some(v) => v <= threshold,
                None => {
                    log::debug!("{}: no '{}' property, dropped", i.native_id, property);
                    false
                }
            })
            .cloned()
            .collect();
        Self {
            images,
            schema: self.schema.clone(),
        }
    }

    /// Distinct acquisition dates (UTC) as `YYYY-MM-DD`, in first-seen order
    pub fn utc_dates(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.images
            .iter()
            .filter_map(|i| Utc.timestamp_millis_opt(i.time_start_ms).single())
            .map(|t| t.format(DATE_FORMAT).to_string())
            .filter(|d| seen.insert(d.clone()))
            .collect()
    }
}

fn common_schema(images: &[ImageRecord]) -> OpcaResult<Option<BTreeSet<String>>> {
    let mut schema: Option<BTreeSet<String>> = None;
    for image in images {
        let keys: BTreeSet<String> = image.tags.keys().cloned().collect();
        match &schema {
            Some(s) if *s != keys => {
                return Err(OpcaError::IncompatibleCollection(format!(
                    "image {} has tag keys {:?}, expected {:?}",
                    image.native_id, keys, s
                )));
            }
            Some(_) => {}
            None => schema = Some(keys),
        }
    }
    Ok(schema)
}

/// Tag with source id and path
fn tag_image(image: ImageRecord, source_id: &str) -> ImageRecord {
    let path = format!("{}/{}", source_id, image.native_id);
    image.with_tag(SOURCE_TAG, source_id).with_tag(PATH_TAG, path)
}

/// Builds aggregated collections from per-year chunk queries
pub struct DatasetAggregator<'a, C: ImageCompute + ?Sized> {
    client: &'a C,
    parallel: bool,
}

impl<'a, C: ImageCompute + ?Sized> DatasetAggregator<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            parallel: cfg!(feature = "parallel"),
        }
    }

    /// Issue chunk queries sequentially even when the `parallel` feature is on
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Query every chunk, tag, merge in chunk order, then apply the quality filter.
    ///
    /// A failing chunk aborts the whole build; no partial collection is returned.
    pub fn build(
        &self,
        params: &AggregateParams,
        aoi: &Geometry,
        chunks: &DateRanges,
    ) -> OpcaResult<AggregatedCollection> {
        log::info!(
            "Aggregating {} over {} chunk(s) ({} <= {})",
            params.source_id,
            chunks.len(),
            params.quality_property,
            params.quality_threshold
        );

        let per_chunk = self.query_chunks(params, aoi, chunks.as_slice())?;

        let mut merged = AggregatedCollection::new();
        for images in per_chunk {
            merged.merge(AggregatedCollection::from_records(images)?)?;
        }

        let filtered = merged.filter_by_property(&params.quality_property, params.quality_threshold);
        log::info!(
            "{}: {} image(s) retrieved, {} pass the quality filter",
            params.source_id,
            merged.len(),
            filtered.len()
        );
        Ok(filtered)
    }

    fn query_chunks(
        &self,
        params: &AggregateParams,
        aoi: &Geometry,
        chunks: &[DateChunk],
    ) -> OpcaResult<Vec<Vec<ImageRecord>>> {
        let run = |chunk: &DateChunk| -> OpcaResult<Vec<ImageRecord>> {
            let images = self
                .client
                .query_images(&params.source_id, aoi, chunk)
                .map_err(|e| {
                    OpcaError::Query(format!("{} chunk {}: {}", params.source_id, chunk, e))
                })?;
            Ok(images
                .into_iter()
                .map(|i| tag_image(i, &params.source_id))
                .collect())
        };

        if self.parallel {
            use rayon::prelude::*;
            // Indexed collect keeps chunk order regardless of completion order
            chunks.par_iter().map(run).collect()
        } else {
            chunks.iter().map(run).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::compute::LocalCatalog;
    use chrono::NaiveDate;

    const SOURCE: &str = "COPERNICUS/S2_HARMONIZED";
    const CLOUD: &str = "CLOUDY_PIXEL_PERCENTAGE";

    fn ms(y: i32, m: u32, d: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    fn catalog() -> LocalCatalog {
        let fp = Geometry::rectangle(-80.0, 43.0, -79.0, 44.0);
        let mut c = LocalCatalog::new();
        let entries = [
            ("20200601_T17", ms(2020, 6, 1), 0.0),
            ("20200602_T17", ms(2020, 6, 2), 12.5),
            ("20210601_T17", ms(2021, 6, 1), 0.0),
            ("20210601_T18", ms(2021, 6, 1), 0.0),
            ("20220601_T17", ms(2022, 6, 1), 3.0),
        ];
        for (id, t, cloud) in entries {
            c.insert(SOURCE, ImageRecord::new(id, t, fp.clone()).with_property(CLOUD, cloud), None);
        }
        c
    }

    fn aoi() -> Geometry {
        Geometry::rectangle(-79.6, 43.4, -79.5, 43.5)
    }

    #[test]
    fn test_build_tags_and_filters() {
        let catalog = catalog();
        let chunks = DateRanges::new("2020-04-01", "2022-10-31").unwrap();
        let params = AggregateParams::new(SOURCE, CLOUD);
        let collection = DatasetAggregator::new(&catalog).build(&params, &aoi(), &chunks).unwrap();

        assert_eq!(
            collection.ids(),
            vec![
                format!("{}/20200601_T17", SOURCE),
                format!("{}/20210601_T17", SOURCE),
                format!("{}/20210601_T18", SOURCE),
            ]
        );
        for image in collection.iter() {
            assert_eq!(image.tag(SOURCE_TAG), Some(SOURCE));
        }
        assert_eq!(collection.utc_dates(), vec!["2020-06-01", "2021-06-01"]);
    }

    #[test]
    fn test_threshold_override() {
        let catalog = catalog();
        let chunks = DateRanges::new("2020-04-01", "2022-10-31").unwrap();
        let params = AggregateParams::new(SOURCE, CLOUD).with_threshold(5.0);
        let collection = DatasetAggregator::new(&catalog)
            .sequential()
            .build(&params, &aoi(), &chunks)
            .unwrap();
        assert_eq!(collection.len(), 4);
    }

    #[test]
    fn test_merge_is_union_of_ids() {
        let catalog = catalog();
        let params = AggregateParams::new(SOURCE, CLOUD).with_threshold(100.0);
        let agg = DatasetAggregator::new(&catalog);
        let a = agg
            .build(&params, &aoi(), &DateRanges::new("2020-01-01", "2020-12-31").unwrap())
            .unwrap();
        let b = agg
            .build(&params, &aoi(), &DateRanges::new("2021-01-01", "2022-12-31").unwrap())
            .unwrap();

        let mut ab = a.clone();
        ab.merge(b.clone()).unwrap();
        let mut ba = b.clone();
        ba.merge(a.clone()).unwrap();

        let union: HashSet<String> = a.id_set().union(&b.id_set()).cloned().collect();
        assert_eq!(ab.id_set(), union);
        assert_eq!(ba.id_set(), union);
        assert_eq!(ab.len(), 5);
    }

    #[test]
    fn test_merge_rejects_mismatched_schema() {
        let fp = Geometry::Point([0.0, 0.0]);
        let mut a = AggregatedCollection::from_records(vec![
            ImageRecord::new("a", 0, fp.clone()).with_tag(SOURCE_TAG, "X"),
        ])
        .unwrap();
        let b = AggregatedCollection::from_records(vec![
            ImageRecord::new("b", 0, fp).with_tag("other", "Y"),
        ])
        .unwrap();
        let err = a.merge(b).unwrap_err();
        assert!(matches!(err, OpcaError::IncompatibleCollection(_)));
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_map_copies() {
        let catalog = catalog();
        let params = AggregateParams::new(SOURCE, CLOUD);
        let original = DatasetAggregator::new(&catalog)
            .build(&params, &aoi(), &DateRanges::new("2020-01-01", "2021-12-31").unwrap())
            .unwrap();
        let mapped = original
            .map(|i| i.clone().with_property("scaled", 2.0))
            .unwrap();
        assert_eq!(mapped.len(), original.len());
        assert!(mapped.iter().all(|i| i.property("scaled") == Some(2.0)));
        assert!(original.iter().all(|i| i.property("scaled").is_none()));
    }

    #[test]
    fn test_failed_chunk_fails_build() {
        let catalog = catalog();
        let params = AggregateParams::new("UNKNOWN/DATASET", CLOUD);
        let err = DatasetAggregator::new(&catalog)
            .build(&params, &aoi(), &DateRanges::new("2020-01-01", "2021-12-31").unwrap())
            .unwrap_err();
        match err {
            OpcaError::Query(msg) => assert!(msg.contains("UNKNOWN/DATASET")),
            other => panic!("unexpected error: {}", other),
        }
    }
}
