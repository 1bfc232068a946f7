//! Pipeline configuration.
//!
//! One TOML file with a `[dateplots]` section (feature-table branch) and a
//! `[compute]` section (reduction branch). Each section is validated once into
//! a plan that the pipeline entry points take by reference.

use crate::core::bands::AugmentOptions;
use crate::core::date_chunks::DateRanges;
use crate::core::pca::PcaParams;
use crate::types::{OpcaError, OpcaResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A known source dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSpec {
    pub id: String,
    /// Property used by the quality filter
    pub quality_property: String,
}

/// Resolve a dataset key
pub fn dataset_for_key(key: &str) -> Option<DatasetSpec> {
    match key {
        "s2" => Some(DatasetSpec {
            id: "COPERNICUS/S2_HARMONIZED".to_string(),
            quality_property: "CLOUDY_PIXEL_PERCENTAGE".to_string(),
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpcaConfig {
    #[serde(default)]
    pub dateplots: Option<DatePlotConfig>,
    #[serde(default)]
    pub compute: Option<ComputeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatePlotConfig {
    /// Dataset key (`s2`) or a full dataset id with `quality_property`
    pub dataset: String,
    pub spatialfile: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_plot_name")]
    pub plot_name: String,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub quality_property: Option<String>,
    #[serde(default)]
    pub quality_threshold: f64,
    /// GeoJSON timezone boundaries used for localization
    #[serde(default)]
    pub timezone_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Feature table written by the dateplots branch
    pub table: PathBuf,
    pub target_year: i32,
    #[serde(default)]
    pub selectors: Option<Vec<String>>,
    #[serde(default, rename = "NDVI", alias = "ndvi")]
    pub ndvi: bool,
    #[serde(default, rename = "NDWI", alias = "ndwi")]
    pub ndwi: bool,
    #[serde(default, rename = "SWM", alias = "swm")]
    pub swm: bool,
    /// Export destination, handed through untouched to whoever writes the
    /// component images out
    #[serde(default)]
    pub cloud_bucket: Option<String>,
    #[serde(default)]
    pub max_pixels: Option<usize>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_plot_name() -> String {
    "figure.png".to_string()
}

fn default_table_name() -> String {
    "table.csv".to_string()
}

/// Validated feature-table branch settings
#[derive(Debug, Clone)]
pub struct DatePlotPlan {
    pub dataset: DatasetSpec,
    pub spatial_file: PathBuf,
    pub output_dir: PathBuf,
    pub plot_name: String,
    pub table_name: String,
    pub chunks: DateRanges,
    pub quality_threshold: f64,
    pub timezone_file: Option<PathBuf>,
}

impl DatePlotPlan {
    pub fn table_path(&self) -> PathBuf {
        self.output_dir.join(&self.table_name)
    }

    pub fn plot_path(&self) -> PathBuf {
        self.output_dir.join(&self.plot_name)
    }

    /// Year index written next to the table (`<table stem>.json`)
    pub fn year_index_path(&self) -> PathBuf {
        self.table_path().with_extension("json")
    }
}

/// Validated reduction branch settings
#[derive(Debug, Clone)]
pub struct ComputePlan {
    pub table: PathBuf,
    pub target_year: i32,
    pub augment: AugmentOptions,
    pub pca: PcaParams,
    /// Pass-through export destination; the reduction itself never reads it
    pub cloud_bucket: Option<String>,
}

impl OpcaConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> OpcaResult<Self> {
        log::info!("Loading configuration: {}", path.as_ref().display());
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            OpcaError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> OpcaResult<Self> {
        toml::from_str(content)
            .map_err(|e| OpcaError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn date_plot_plan(&self) -> OpcaResult<DatePlotPlan> {
        let section = self
            .dateplots
            .as_ref()
            .ok_or_else(|| OpcaError::Config("missing [dateplots] section".to_string()))?;
        section.validate()
    }

    pub fn compute_plan(&self) -> OpcaResult<ComputePlan> {
        let section = self
            .compute
            .as_ref()
            .ok_or_else(|| OpcaError::Config("missing [compute] section".to_string()))?;
        section.validate()
    }
}

impl DatePlotConfig {
    pub fn validate(&self) -> OpcaResult<DatePlotPlan> {
        let dataset = match (dataset_for_key(&self.dataset), &self.quality_property) {
            (Some(mut known), override_property) => {
                if let Some(p) = override_property {
                    known.quality_property = p.clone();
                }
                known
            }
            (None, Some(p)) if self.dataset.contains('/') => DatasetSpec {
                id: self.dataset.clone(),
                quality_property: p.clone(),
            },
            (None, _) => {
                return Err(OpcaError::Config(format!(
                    "unknown dataset '{}' (use a known key or a full id with quality_property)",
                    self.dataset
                )))
            }
        };

        if !self.quality_threshold.is_finite() {
            return Err(OpcaError::Config("quality_threshold must be finite".to_string()));
        }

        let chunks = DateRanges::new(&self.start_date, &self.end_date)?;

        Ok(DatePlotPlan {
            dataset,
            spatial_file: self.spatialfile.clone(),
            output_dir: self.output_dir.clone(),
            plot_name: self.plot_name.clone(),
            table_name: self.table_name.clone(),
            chunks,
            quality_threshold: self.quality_threshold,
            timezone_file: self.timezone_file.clone(),
        })
    }
}

impl ComputeConfig {
    pub fn validate(&self) -> OpcaResult<ComputePlan> {
        let select_bands = self.selectors.clone().unwrap_or_default();
        if select_bands.iter().any(|s| s.trim().is_empty()) {
            return Err(OpcaError::Config("selectors must not contain empty names".to_string()));
        }

        let mut pca = PcaParams::default();
        if let Some(max) = self.max_pixels {
            if max == 0 {
                return Err(OpcaError::Config("max_pixels must be positive".to_string()));
            }
            pca.max_pixels = max;
        }

        Ok(ComputePlan {
            table: self.table.clone(),
            target_year: self.target_year,
            augment: AugmentOptions {
                compute_ndvi: self.ndvi,
                compute_ndwi: self.ndwi,
                compute_water_mask: self.swm,
                select_bands,
            },
            pca,
            cloud_bucket: self.cloud_bucket.clone(),
        })
    }
}
