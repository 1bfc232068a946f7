use crate::core::aggregate::AggregatedCollection;
use crate::io::compute::ImageCompute;
use crate::types::{FeatureRow, OpcaResult};

/// Drop every `_`-separated segment of `raw_id` made only of digits.
///
/// Merged collections prefix image ids with positional indices (`1_2_...`)
/// that change between runs; removing them leaves the stable part.
pub fn strip_numeric_segments(raw_id: &str) -> String {
    raw_id
        .split('_')
        .filter(|segment| segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join("_")
}

/// `sourceId/cleanedId`
pub fn provenance_id(source_id: &str, raw_id: &str) -> String {
    format!("{}/{}", source_id, strip_numeric_segments(raw_id))
}

/// One row per image: geometry, provenance id, path and UTC timestamp.
/// Local-time fields are left for the localizer.
pub fn to_rows<C: ImageCompute + ?Sized>(
    client: &C,
    collection: &AggregatedCollection,
) -> OpcaResult<Vec<FeatureRow>> {
    if collection.is_empty() {
        return Ok(Vec::new());
    }

    let features = client.materialize_features(collection.images())?;
    log::info!("Materialised {} feature(s)", features.len());

    Ok(features
        .into_iter()
        .map(|f| {
            let (provenance_id, path) = match &f.source_id {
                Some(source) => (
                    provenance_id(source, &f.native_id),
                    f.path.clone().unwrap_or_else(|| format!("{}/{}", source, f.native_id)),
                ),
                None => (
                    strip_numeric_segments(&f.native_id),
                    f.path.clone().unwrap_or_else(|| f.native_id.clone()),
                ),
            };
            FeatureRow {
                geometry: f.geometry,
                provenance_id,
                path,
                utc_timestamp_ms: f.time_start_ms,
                local: None,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::compute::{LocalCatalog, PATH_TAG, SOURCE_TAG};
    use crate::types::{Geometry, ImageRecord};

    #[test]
    fn test_strip_merge_prefixes() {
        assert_eq!(
            strip_numeric_segments("1_2_20210615T160829_20210615T161447_T17TNJ"),
            "20210615T160829_20210615T161447_T17TNJ"
        );
        assert_eq!(strip_numeric_segments("COPERNICUS_20210615T1_0"), "COPERNICUS_20210615T1");
        assert_eq!(strip_numeric_segments("ABC"), "ABC");
    }

    #[test]
    fn test_strip_is_idempotent() {
        for raw in ["1_2_X_3", "COPERNICUS_20210615T1_0", "7", "A__1_B", ""] {
            let once = strip_numeric_segments(raw);
            assert_eq!(strip_numeric_segments(&once), once);
        }
    }

    #[test]
    fn test_provenance_id_joins_prefix() {
        assert_eq!(
            provenance_id("COPERNICUS/S2_HARMONIZED", "3_20210615T1_T17TNJ"),
            "COPERNICUS/S2_HARMONIZED/20210615T1_T17TNJ"
        );
    }

    #[test]
    fn test_rows_follow_collection() {
        let fp = Geometry::rectangle(0.0, 0.0, 1.0, 1.0);
        let records = vec![
            ImageRecord::new("1_IMG_A", 1_000, fp.clone())
                .with_tag(SOURCE_TAG, "DS")
                .with_tag(PATH_TAG, "DS/1_IMG_A"),
            ImageRecord::new("IMG_B", 2_000, fp)
                .with_tag(SOURCE_TAG, "DS")
                .with_tag(PATH_TAG, "DS/IMG_B"),
        ];
        let collection = AggregatedCollection::from_records(records).unwrap();
        let rows = to_rows(&LocalCatalog::new(), &collection).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].provenance_id, "DS/IMG_A");
        assert_eq!(rows[0].path, "DS/1_IMG_A");
        assert_eq!(rows[1].utc_timestamp_ms, 2_000);
        assert!(rows.iter().all(|r| r.local.is_none()));
    }

    #[test]
    fn test_empty_collection_gives_no_rows() {
        let rows = to_rows(&LocalCatalog::new(), &AggregatedCollection::new()).unwrap();
        assert!(rows.is_empty());
    }
}
