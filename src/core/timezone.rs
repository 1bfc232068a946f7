use crate::types::{BoundingBox, GeoPoint, Geometry, OpcaError, OpcaResult};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;

/// Resolves the IANA zone containing a point
pub trait TimezoneLookup: Send + Sync {
    fn timezone_at(&self, point: GeoPoint) -> Option<Tz>;
}

#[derive(Debug, Clone)]
struct ZonePolygon {
    tz: Tz,
    geometry: Geometry,
    bbox: BoundingBox,
}

/// Zone boundary polygons with point-in-polygon lookup.
///
/// Points covered by no polygon resolve to nothing; there is no UTC fallback.
#[derive(Debug, Clone, Default)]
pub struct ZoneBoundaries {
    zones: Vec<ZonePolygon>,
}

#[derive(Deserialize)]
struct ZoneCollection {
    features: Vec<ZoneFeature>,
}

#[derive(Deserialize)]
struct ZoneFeature {
    properties: ZoneProperties,
    geometry: Geometry,
}

#[derive(Deserialize)]
struct ZoneProperties {
    tzid: String,
}

impl ZoneBoundaries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a polygonal zone; the name must be a known IANA zone
    pub fn add_zone(&mut self, tzid: &str, geometry: Geometry) -> OpcaResult<()> {
        let tz: Tz = tzid
            .parse()
            .map_err(|_| OpcaError::Config(format!("'{}' is not an IANA timezone", tzid)))?;
        if matches!(geometry, Geometry::Point(_)) {
            return Err(OpcaError::InvalidGeometry(format!(
                "zone {} must be a polygon",
                tzid
            )));
        }
        let bbox = geometry
            .bounding_box()
            .ok_or_else(|| OpcaError::InvalidGeometry(format!("zone {} is empty", tzid)))?;
        self.zones.push(ZonePolygon { tz, geometry, bbox });
        Ok(())
    }

    pub fn with_zone(mut self, tzid: &str, geometry: Geometry) -> OpcaResult<Self> {
        self.add_zone(tzid, geometry)?;
        Ok(self)
    }

    /// Parse a GeoJSON FeatureCollection whose features carry a `tzid` property
    pub fn from_geojson_str(content: &str) -> OpcaResult<Self> {
        let collection: ZoneCollection = serde_json::from_str(content)?;
        let mut boundaries = Self::new();
        for feature in collection.features {
            boundaries.add_zone(&feature.properties.tzid, feature.geometry)?;
        }
        log::info!("Loaded {} timezone polygon(s)", boundaries.len());
        Ok(boundaries)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> OpcaResult<Self> {
        log::info!("Reading timezone boundaries: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path)?;
        Self::from_geojson_str(&content)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

impl TimezoneLookup for ZoneBoundaries {
    fn timezone_at(&self, point: GeoPoint) -> Option<Tz> {
        self.zones
            .iter()
            .filter(|z| z.bbox.contains(point))
            .find(|z| z.geometry.contains(point))
            .map(|z| z.tz)
    }
}
