//! Feature-table persistence: CSV rows, a year -> provenance id JSON index,
//! and the axis layout of the julian-day/year scatter.

use crate::types::{FeatureRow, OpcaError, OpcaResult};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Flat CSV row. Geometry is not exported; the centroid is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub provenance_id: String,
    pub syspath: String,
    /// Epoch milliseconds, UTC
    pub utc: i64,
    pub timezone: Option<String>,
    /// RFC 3339 local time with offset
    pub timestamp: Option<String>,
    pub year: Option<i32>,
    pub julian_date: Option<u32>,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

impl TableRecord {
    pub fn local_timestamp(&self) -> OpcaResult<Option<DateTime<FixedOffset>>> {
        self.timestamp
            .as_deref()
            .map(|t| {
                DateTime::parse_from_rfc3339(t).map_err(|e| {
                    OpcaError::InvalidRange(format!("{}: bad timestamp '{}': {}", self.syspath, t, e))
                })
            })
            .transpose()
    }
}

impl From<&FeatureRow> for TableRecord {
    fn from(row: &FeatureRow) -> Self {
        let local = row.local.as_ref();
        TableRecord {
            provenance_id: row.provenance_id.clone(),
            syspath: row.path.clone(),
            utc: row.utc_timestamp_ms,
            timezone: local.map(|l| l.timezone.clone()),
            timestamp: local.map(|l| l.local_timestamp.to_rfc3339()),
            year: local.map(|l| l.year),
            julian_date: local.map(|l| l.julian_day),
            x: local.map(|l| l.centroid.lon),
            y: local.map(|l| l.centroid.lat),
        }
    }
}

pub fn write_feature_table<P: AsRef<Path>>(path: P, rows: &[FeatureRow]) -> OpcaResult<()> {
    log::info!("Writing {} row(s) to {}", rows.len(), path.as_ref().display());
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(TableRecord::from(row))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_feature_table<P: AsRef<Path>>(path: P) -> OpcaResult<Vec<TableRecord>> {
    log::info!("Reading feature table: {}", path.as_ref().display());
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<Result<Vec<TableRecord>, csv::Error>>()?;
    Ok(records)
}

/// Image paths of the records acquired in local `year`
pub fn paths_for_year(records: &[TableRecord], year: i32) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.year == Some(year))
        .map(|r| r.syspath.clone())
        .collect()
}

/// Provenance ids grouped by local year; unlocalized rows are left out
pub fn group_ids_by_year(rows: &[FeatureRow]) -> BTreeMap<i32, Vec<String>> {
    let mut groups: BTreeMap<i32, Vec<String>> = BTreeMap::new();
    for row in rows {
        if let Some(local) = &row.local {
            groups
                .entry(local.year)
                .or_default()
                .push(row.provenance_id.clone());
        }
    }
    groups
}

pub fn write_year_index<P: AsRef<Path>>(path: P, rows: &[FeatureRow]) -> OpcaResult<()> {
    let groups = group_ids_by_year(rows);
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, &groups)?;
    Ok(())
}

pub fn read_year_index<P: AsRef<Path>>(path: P) -> OpcaResult<BTreeMap<i32, Vec<String>>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Axis layout of the julian-day (x) versus year (y) scatter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScatterAxes {
    pub x_range: (u32, u32),
    pub x_ticks: Vec<u32>,
    pub y_range: (i32, i32),
    pub y_ticks: Vec<i32>,
}

impl ScatterAxes {
    pub const X_MIN: u32 = 1;
    pub const X_MAX: u32 = 366;
    pub const X_TICK_STEP: usize = 50;

    /// `None` when no row is localized
    pub fn from_rows(rows: &[FeatureRow]) -> Option<Self> {
        let years: Vec<i32> = rows.iter().filter_map(|r| r.local.as_ref()).map(|l| l.year).collect();
        let min = *years.iter().min()?;
        let max = *years.iter().max()?;

        Some(Self {
            x_range: (Self::X_MIN, Self::X_MAX),
            x_ticks: (0..Self::X_MAX).step_by(Self::X_TICK_STEP).collect(),
            y_range: (min - 1, max + 1),
            y_ticks: (min - 1..max + 1).collect(),
        })
    }
}
