use approx::assert_relative_eq;
use chrono::{FixedOffset, TimeZone};
use ndarray::Array2;
use opca::config::OpcaConfig;
use opca::core::bands::BandImage;
use opca::io::table::write_feature_table;
use opca::pipeline::{reduce_paths, run_reduction};
use opca::{
    FailurePolicy, FeatureRow, GeoPoint, Geometry, ImageRecord, LocalCatalog, LocalizedTime,
    OpcaError,
};

const S2: &str = "COPERNICUS/S2_HARMONIZED";

/// Deterministic texture in [0, 1)
fn noise(r: usize, c: usize, band: usize, seed: f64) -> f64 {
    let x = (r as f64 * 12.9898 + c as f64 * 78.233 + band as f64 * 37.719 + seed * 4.581).sin()
        * 43758.5453;
    x - x.floor()
}

/// Synthetic 4x5 Sentinel-2 scene; `seed` varies the texture between dates
fn scene(seed: f64) -> BandImage {
    let bases = [("B2", 0.05), ("B3", 0.08), ("B4", 0.06), ("B8", 0.30), ("B11", 0.20)];
    let mut bands: Vec<(String, Array2<f64>)> = bases
        .iter()
        .enumerate()
        .map(|(k, (name, base))| {
            let layer = Array2::from_shape_fn((4, 5), |(r, c)| base + 0.1 * noise(r, c, k, seed));
            (name.to_string(), layer)
        })
        .collect();
    bands.push(("QA60".to_string(), Array2::zeros((4, 5))));
    BandImage::from_bands("scene", bands).unwrap()
}

fn flat_scene() -> BandImage {
    let bands = ["B2", "B3", "B4", "B8", "B11"]
        .iter()
        .map(|b| (b.to_string(), Array2::from_elem((3, 3), 0.1)))
        .collect();
    BandImage::from_bands("flat", bands).unwrap()
}

fn catalog() -> LocalCatalog {
    let fp = Geometry::rectangle(-80.0, 43.0, -79.0, 44.0);
    let mut c = LocalCatalog::new();
    c.insert(S2, ImageRecord::new("IMG_2019A", 0, fp.clone()), Some(scene(1.0)));
    c.insert(S2, ImageRecord::new("IMG_2019B", 0, fp.clone()), Some(scene(2.5)));
    c.insert(S2, ImageRecord::new("IMG_2020A", 0, fp.clone()), Some(scene(4.0)));
    c.insert(S2, ImageRecord::new("IMG_FLAT", 0, fp), Some(flat_scene()));
    c
}

fn table_row(native_id: &str, year: i32) -> FeatureRow {
    let local = FixedOffset::west_opt(4 * 3600)
        .unwrap()
        .with_ymd_and_hms(year, 6, 1, 12, 0, 0)
        .unwrap();
    FeatureRow {
        geometry: Geometry::Point([-79.5, 43.5]),
        provenance_id: format!("{}/{}", S2, native_id),
        path: format!("{}/{}", S2, native_id),
        utc_timestamp_ms: local.timestamp_millis(),
        local: Some(LocalizedTime {
            timezone: "America/Toronto".to_string(),
            centroid: GeoPoint::new(-79.5, 43.5),
            local_timestamp: local,
            year,
            julian_day: 152,
        }),
    }
}

#[test]
fn test_reduction_for_target_year() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let table = dir.path().join("table.csv");
    write_feature_table(
        &table,
        &[
            table_row("IMG_2019A", 2019),
            table_row("IMG_2020A", 2020),
            table_row("IMG_2019B", 2019),
        ],
    )
    .unwrap();

    let config = OpcaConfig::from_toml_str(&format!(
        r#"
        [compute]
        table = "{}"
        target_year = 2019
        NDVI = true
        NDWI = true
        SWM = true
        "#,
        table.display()
    ))
    .unwrap();
    let plan = config.compute_plan().unwrap();

    let results = run_reduction(&plan, &catalog(), FailurePolicy::FailFast).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].source_id(), format!("{}/IMG_2019A", S2));
    assert_eq!(results[1].source_id(), format!("{}/IMG_2019B", S2));

    for result in &results {
        // Five reflectance bands (QA60 dropped) plus three indices
        assert_eq!(
            result.input_bands,
            vec!["B2", "B3", "B4", "B8", "B11", "NDVI", "NDWI", "SWM"]
        );
        let names: Vec<String> = (1..=8).map(|i| format!("pc_{}", i)).collect();
        assert_eq!(result.components.band_names(), names.as_slice());
        assert!(result.eigenvalues.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(result.components.shape(), (4, 5));
    }
}

#[test]
fn test_single_selector_reduces_over_time() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let table = dir.path().join("table.csv");
    write_feature_table(
        &table,
        &[
            table_row("IMG_2019A", 2019),
            table_row("IMG_2020A", 2020),
            table_row("IMG_2019B", 2019),
        ],
    )
    .unwrap();

    let config = OpcaConfig::from_toml_str(&format!(
        r#"
        [compute]
        table = "{}"
        target_year = 2019
        selectors = ["NDVI"]
        NDVI = true
        "#,
        table.display()
    ))
    .unwrap();
    let plan = config.compute_plan().unwrap();

    let results = run_reduction(&plan, &catalog(), FailurePolicy::FailFast).unwrap();
    assert_eq!(results.len(), 1);

    let stacked = &results[0];
    assert_eq!(stacked.source_id(), "stack/NDVI");
    assert_eq!(
        stacked.input_bands,
        vec![format!("{}/IMG_2019A", S2), format!("{}/IMG_2019B", S2)]
    );
    assert_eq!(stacked.components.band_names(), &["pc_1", "pc_2"]);
    assert_eq!(stacked.components.shape(), (4, 5));
    assert!(stacked.eigenvalues[0] >= stacked.eigenvalues[1]);
}

#[test]
fn test_selected_bands_drive_component_count() {
    let config = OpcaConfig::from_toml_str(
        r#"
        [compute]
        table = "unused.csv"
        target_year = 2019
        selectors = ["B8", "B4", "NDVI"]
        NDVI = true
        "#,
    )
    .unwrap();
    let plan = config.compute_plan().unwrap();

    let results = reduce_paths(
        &plan,
        &catalog(),
        &[format!("{}/IMG_2019A", S2)],
        FailurePolicy::FailFast,
    )
    .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].input_bands, vec!["B8", "B4", "NDVI"]);
    assert_eq!(results[0].components.band_count(), 3);

    let ratios: f64 = results[0].explained_variance_ratio().iter().sum();
    assert_relative_eq!(ratios, 1.0, epsilon = 1e-12);
}

#[test]
fn test_degenerate_and_unknown_images() {
    let config = OpcaConfig::from_toml_str(
        r#"
        [compute]
        table = "unused.csv"
        target_year = 2019
        "#,
    )
    .unwrap();
    let plan = config.compute_plan().unwrap();
    let paths = vec![
        format!("{}/IMG_2019A", S2),
        format!("{}/IMG_FLAT", S2),
        format!("{}/MISSING", S2),
    ];

    let err = reduce_paths(&plan, &catalog(), &paths, FailurePolicy::FailFast).unwrap_err();
    assert!(matches!(err, OpcaError::Query(_)));

    let err = reduce_paths(&plan, &catalog(), &paths[..2], FailurePolicy::FailFast).unwrap_err();
    match err {
        OpcaError::DegeneratePca { image, .. } => assert_eq!(image, format!("{}/IMG_FLAT", S2)),
        other => panic!("unexpected error: {}", other),
    }

    let kept = reduce_paths(&plan, &catalog(), &paths, FailurePolicy::SkipAndContinue).unwrap();
    assert_eq!(kept.len(), 1);
}

#[test]
fn test_unknown_selector_fails() {
    let config = OpcaConfig::from_toml_str(
        r#"
        [compute]
        table = "unused.csv"
        target_year = 2019
        selectors = ["SWM"]
        "#,
    )
    .unwrap();
    let plan = config.compute_plan().unwrap();

    let err = reduce_paths(
        &plan,
        &catalog(),
        &[format!("{}/IMG_2019A", S2)],
        FailurePolicy::FailFast,
    )
    .unwrap_err();
    assert!(matches!(err, OpcaError::UnknownBand { ref band, .. } if band == "SWM"));
}
