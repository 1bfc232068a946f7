use crate::types::{Geometry, OpcaError, OpcaResult};
use serde_json::Value;
use std::path::Path;

/// Read the area of interest from a GeoJSON file.
///
/// Accepts a FeatureCollection (first feature wins), a single Feature or a
/// bare geometry object.
pub fn load_boundary<P: AsRef<Path>>(path: P) -> OpcaResult<Geometry> {
    log::info!("Reading boundary file: {}", path.as_ref().display());
    let content = std::fs::read_to_string(&path)?;
    parse_boundary(&content)
}

pub fn parse_boundary(content: &str) -> OpcaResult<Geometry> {
    let root: Value = serde_json::from_str(content)?;

    let geometry = match root.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => root
            .get("features")
            .and_then(Value::as_array)
            .and_then(|features| features.first())
            .and_then(|feature| feature.get("geometry"))
            .ok_or_else(|| {
                OpcaError::InvalidGeometry("feature collection has no features".to_string())
            })?,
        Some("Feature") => root
            .get("geometry")
            .ok_or_else(|| OpcaError::InvalidGeometry("feature has no geometry".to_string()))?,
        Some(_) => &root,
        None => {
            return Err(OpcaError::InvalidGeometry(
                "missing GeoJSON 'type' member".to_string(),
            ))
        }
    };

    serde_json::from_value(geometry.clone()).map_err(|e| {
        OpcaError::InvalidGeometry(format!("unsupported boundary geometry: {}", e))
    })
}
