//! Pipeline entry points.
//!
//! The feature branch turns a date range into a localized feature table; the
//! reduction branch fetches images, augments their bands and runs per-image
//! PCA. Both take an explicit validated plan and an image-compute client.

use crate::config::{ComputePlan, DatePlotPlan};
use crate::core::aggregate::{AggregateParams, AggregatedCollection, DatasetAggregator};
use crate::core::bands::BandAugmenter;
use crate::core::localize::TemporalLocalizer;
use crate::core::pca::{PcaReducer, PcaResult};
use crate::core::tabularize::to_rows;
use crate::core::timezone::{TimezoneLookup, ZoneBoundaries};
use crate::io::boundary::load_boundary;
use crate::io::compute::ImageCompute;
use crate::io::table::{
    paths_for_year, read_feature_table, write_feature_table, write_year_index, ScatterAxes,
};
use crate::types::{FailurePolicy, FeatureRow, Geometry, OpcaError, OpcaResult};
use std::path::PathBuf;

/// Output of the feature branch
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub rows: Vec<FeatureRow>,
    /// `None` when nothing was localized
    pub axes: Option<ScatterAxes>,
}

/// Files written by [`run_feature_table`]
#[derive(Debug, Clone)]
pub struct FeatureOutputs {
    pub table: FeatureTable,
    pub table_path: PathBuf,
    pub year_index_path: PathBuf,
}

/// Aggregate, tabularize and localize for an already-loaded AOI
pub fn build_feature_table<C, L>(
    plan: &DatePlotPlan,
    client: &C,
    aoi: &Geometry,
    zones: &L,
    policy: FailurePolicy,
) -> OpcaResult<FeatureTable>
where
    C: ImageCompute + ?Sized,
    L: TimezoneLookup + ?Sized,
{
    let params = AggregateParams::new(&plan.dataset.id, &plan.dataset.quality_property)
        .with_threshold(plan.quality_threshold);

    let collection = DatasetAggregator::new(client).build(&params, aoi, &plan.chunks)?;
    let rows = to_rows(client, &collection)?;
    let rows = TemporalLocalizer::new(zones).with_policy(policy).localize(rows)?;
    let axes = ScatterAxes::from_rows(&rows);

    Ok(FeatureTable { rows, axes })
}

/// Feature branch end to end: load the AOI and timezone boundaries named by
/// the plan, build the table and write the CSV and the year index.
pub fn run_feature_table<C: ImageCompute + ?Sized>(
    plan: &DatePlotPlan,
    client: &C,
    policy: FailurePolicy,
) -> OpcaResult<FeatureOutputs> {
    let aoi = load_boundary(&plan.spatial_file)?;
    let tz_file = plan.timezone_file.as_ref().ok_or_else(|| {
        OpcaError::Config("dateplots.timezone_file is required for localization".to_string())
    })?;
    let zones = ZoneBoundaries::from_file(tz_file)?;

    let table = build_feature_table(plan, client, &aoi, &zones, policy)?;

    std::fs::create_dir_all(&plan.output_dir)?;
    let table_path = plan.table_path();
    let year_index_path = plan.year_index_path();
    write_feature_table(&table_path, &table.rows)?;
    write_year_index(&year_index_path, &table.rows)?;

    Ok(FeatureOutputs {
        table,
        table_path,
        year_index_path,
    })
}

/// Fetch and augment every image path, then reduce.
///
/// With exactly one selected band the selected layer of every image is
/// stacked by date and reduced once (PCA over time); otherwise each image is
/// reduced independently.
pub fn reduce_paths<C: ImageCompute + ?Sized>(
    plan: &ComputePlan,
    client: &C,
    paths: &[String],
    policy: FailurePolicy,
) -> OpcaResult<Vec<PcaResult>> {
    let augmenter = BandAugmenter::default();
    let reflectance = augmenter.sensor().reflectance_pattern.clone();

    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        let prepared = client
            .fetch_image(path)
            .and_then(|image| image.select_matching(&reflectance))
            .and_then(|image| augmenter.augment(image, &plan.augment));
        match (prepared, policy) {
            (Ok(image), _) => images.push(image),
            (Err(e), FailurePolicy::FailFast) => return Err(e),
            (Err(e), FailurePolicy::SkipAndContinue) => {
                log::warn!("Image {} skipped: {}", path, e);
            }
        }
    }

    let reducer = PcaReducer::new(plan.pca.clone());
    match plan.augment.select_bands.as_slice() {
        [band] => {
            if images.is_empty() {
                log::warn!("No image left to stack for {}", band);
                return Ok(Vec::new());
            }
            Ok(vec![reducer.reduce_over_time(&images, band)?])
        }
        _ => reducer.reduce_temporal(&images, policy),
    }
}

/// Reduction over every image of an aggregated collection
pub fn reduce_collection<C: ImageCompute + ?Sized>(
    plan: &ComputePlan,
    client: &C,
    collection: &AggregatedCollection,
    policy: FailurePolicy,
) -> OpcaResult<Vec<PcaResult>> {
    reduce_paths(plan, client, &collection.ids(), policy)
}

/// Reduction branch end to end: images of `target_year` from the feature table
pub fn run_reduction<C: ImageCompute + ?Sized>(
    plan: &ComputePlan,
    client: &C,
    policy: FailurePolicy,
) -> OpcaResult<Vec<PcaResult>> {
    let records = read_feature_table(&plan.table)?;
    let paths = paths_for_year(&records, plan.target_year);
    log::info!(
        "{} of {} table row(s) fall in {}",
        paths.len(),
        records.len(),
        plan.target_year
    );

    reduce_paths(plan, client, &paths, policy)
}
