use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Date format used for every date string crossing the crate boundary
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Longitude/latitude pair in degrees (WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        point.lon >= self.min_lon
            && point.lon <= self.max_lon
            && point.lat >= self.min_lat
            && point.lat <= self.max_lat
    }
}

/// Linear ring as `[lon, lat]` positions (GeoJSON order)
pub type Ring = Vec<[f64; 2]>;

/// Footprint geometry. Serialises to the GeoJSON geometry object layout.
///
/// Positions are read with any trailing altitude dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates", try_from = "GeoJsonGeometry")]
pub enum Geometry {
    Point([f64; 2]),
    /// Exterior ring first, holes after
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

/// GeoJSON geometry as written on disk: positions of two or more values
#[derive(Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum GeoJsonGeometry {
    Point(Vec<f64>),
    Polygon(Vec<Vec<Vec<f64>>>),
    MultiPolygon(Vec<Vec<Vec<Vec<f64>>>>),
}

fn position(values: Vec<f64>) -> Result<[f64; 2], String> {
    match values.as_slice() {
        [lon, lat, ..] => Ok([*lon, *lat]),
        _ => Err(format!(
            "position needs at least 2 values, got {}",
            values.len()
        )),
    }
}

fn ring(positions: Vec<Vec<f64>>) -> Result<Ring, String> {
    positions.into_iter().map(position).collect()
}

fn rings(list: Vec<Vec<Vec<f64>>>) -> Result<Vec<Ring>, String> {
    list.into_iter().map(ring).collect()
}

impl TryFrom<GeoJsonGeometry> for Geometry {
    type Error = String;

    fn try_from(raw: GeoJsonGeometry) -> Result<Self, Self::Error> {
        Ok(match raw {
            GeoJsonGeometry::Point(p) => Geometry::Point(position(p)?),
            GeoJsonGeometry::Polygon(r) => Geometry::Polygon(rings(r)?),
            GeoJsonGeometry::MultiPolygon(polys) => Geometry::MultiPolygon(
                polys.into_iter().map(rings).collect::<Result<_, _>>()?,
            ),
        })
    }
}

impl Geometry {
    /// Axis-aligned rectangle, handy for areas of interest and tests
    pub fn rectangle(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Geometry::Polygon(vec![vec![
            [min_lon, min_lat],
            [max_lon, min_lat],
            [max_lon, max_lat],
            [min_lon, max_lat],
            [min_lon, min_lat],
        ]])
    }

    fn polygons(&self) -> Vec<&[Ring]> {
        match self {
            Geometry::Point(_) => Vec::new(),
            Geometry::Polygon(rings) => vec![rings.as_slice()],
            Geometry::MultiPolygon(polys) => polys.iter().map(|p| p.as_slice()).collect(),
        }
    }

    fn positions(&self) -> Vec<[f64; 2]> {
        match self {
            Geometry::Point(p) => vec![*p],
            _ => self
                .polygons()
                .into_iter()
                .flat_map(|rings| rings.iter().flat_map(|r| r.iter().copied()))
                .collect(),
        }
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let positions = self.positions();
        let first = positions.first()?;
        let mut bbox = BoundingBox {
            min_lon: first[0],
            max_lon: first[0],
            min_lat: first[1],
            max_lat: first[1],
        };
        for [lon, lat] in positions.iter().skip(1) {
            bbox.min_lon = bbox.min_lon.min(*lon);
            bbox.max_lon = bbox.max_lon.max(*lon);
            bbox.min_lat = bbox.min_lat.min(*lat);
            bbox.max_lat = bbox.max_lat.max(*lat);
        }
        Some(bbox)
    }

    /// Planar (degree-space) centroid.
    ///
    /// Polygons use the area-weighted shoelace centroid with holes subtracted;
    /// zero-area shapes fall back to the vertex mean.
    pub fn centroid(&self) -> Option<GeoPoint> {
        if let Geometry::Point([lon, lat]) = self {
            return Some(GeoPoint::new(*lon, *lat));
        }

        let mut area_sum = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;
        for rings in self.polygons() {
            for (i, ring) in rings.iter().enumerate() {
                let (a, x, y) = ring_moments(ring);
                // Exterior counts positive, holes negative, regardless of winding
                let ring_sign = if i == 0 { 1.0 } else { -1.0 };
                area_sum += ring_sign * a.abs();
                cx += ring_sign * a.signum() * x;
                cy += ring_sign * a.signum() * y;
            }
        }

        if area_sum.abs() > 1e-15 {
            return Some(GeoPoint::new(cx / area_sum, cy / area_sum));
        }

        let positions = self.positions();
        if positions.is_empty() {
            return None;
        }
        let n = positions.len() as f64;
        let (sx, sy) = positions
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
        Some(GeoPoint::new(sx / n, sy / n))
    }

    /// Even-odd point-in-polygon test honouring holes
    pub fn contains(&self, point: GeoPoint) -> bool {
        match self {
            Geometry::Point(_) => false,
            _ => self.polygons().into_iter().any(|rings| {
                let mut rings = rings.iter();
                match rings.next() {
                    Some(exterior) if ring_contains(exterior, point) => {
                        !rings.any(|hole| ring_contains(hole, point))
                    }
                    _ => false,
                }
            }),
        }
    }

    /// Bounding-box overlap, the same coarse test a footprint filter uses
    pub fn intersects(&self, other: &Geometry) -> bool {
        match (self.bounding_box(), other.bounding_box()) {
            (Some(a), Some(b)) => a.intersects(&b),
            _ => false,
        }
    }
}

/// Signed area and the (unnormalised) first moments of a ring
fn ring_moments(ring: &[[f64; 2]]) -> (f64, f64, f64) {
    if ring.len() < 3 {
        return (0.0, 0.0, 0.0);
    }
    let mut a2 = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..ring.len() {
        let [x0, y0] = ring[i];
        let [x1, y1] = ring[(i + 1) % ring.len()];
        let cross = x0 * y1 - x1 * y0;
        a2 += cross;
        cx += (x0 + x1) * cross;
        cy += (y0 + y1) * cross;
    }
    let area = a2 / 2.0;
    (area, cx / 6.0, cy / 6.0)
}

fn ring_contains(ring: &[[f64; 2]], point: GeoPoint) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let [xi, yi] = ring[i];
        let [xj, yj] = ring[j];
        if (yi > point.lat) != (yj > point.lat)
            && point.lon < (xj - xi) * (point.lat - yi) / (yj - yi) + xi
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// One calendar-year slice of a requested date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateChunk {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateChunk {
    pub fn start_str(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }

    pub fn as_strings(&self) -> (String, String) {
        (self.start_str(), self.end_str())
    }
}

impl std::fmt::Display for DateChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start_str(), self.end_str())
    }
}

/// Image metadata as returned by a catalogue query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Identifier native to the source catalogue
    pub native_id: String,
    /// Acquisition start, epoch milliseconds UTC
    pub time_start_ms: i64,
    pub geometry: Geometry,
    /// Numeric metadata (cloud fraction and similar)
    pub properties: BTreeMap<String, f64>,
    /// Provenance tags attached during aggregation
    pub tags: BTreeMap<String, String>,
}

impl ImageRecord {
    pub fn new(native_id: impl Into<String>, time_start_ms: i64, geometry: Geometry) -> Self {
        Self {
            native_id: native_id.into(),
            time_start_ms,
            geometry,
            properties: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: f64) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<f64> {
        self.properties.get(name).copied()
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Local-time fields derived from a row's footprint and UTC timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedTime {
    /// IANA zone name
    pub timezone: String,
    /// Footprint centroid used for the zone lookup
    pub centroid: GeoPoint,
    pub local_timestamp: DateTime<FixedOffset>,
    pub year: i32,
    /// 1-based day of year in the local calendar
    pub julian_day: u32,
}

/// One row per image of an aggregated collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub geometry: Geometry,
    /// `sourceId/cleanedId`
    pub provenance_id: String,
    /// `sourceId/nativeId`, the path used to fetch the image again
    pub path: String,
    pub utc_timestamp_ms: i64,
    /// Filled by the temporal localizer
    pub local: Option<LocalizedTime>,
}

/// How batch operations react to a failing element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abort on the first failure
    #[default]
    FailFast,
    /// Log the failure and drop the element
    SkipAndContinue,
}

/// Error types for feature-table and reduction processing
#[derive(Debug, thiserror::Error)]
pub enum OpcaError {
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Incompatible collections: {0}")]
    IncompatibleCollection(String),

    #[error("No timezone found for {id} at lon={lon:.5}, lat={lat:.5}")]
    TimezoneResolution { id: String, lon: f64, lat: f64 },

    #[error("Unknown band '{band}' in image {image} (available: {available:?})")]
    UnknownBand {
        band: String,
        image: String,
        available: Vec<String>,
    },

    #[error("Degenerate PCA for image {image}: {reason}")]
    DegeneratePca { image: String, reason: String },

    #[error("Image {image} has {pixels} valid pixels, above the budget of {max_pixels}")]
    PixelBudgetExceeded {
        image: String,
        pixels: usize,
        max_pixels: usize,
    },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for opca operations
pub type OpcaResult<T> = Result<T, OpcaError>;
