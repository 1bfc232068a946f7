use crate::types::{OpcaError, OpcaResult};
use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use regex::Regex;

/// Band name of the appended vegetation index
pub const NDVI_BAND: &str = "NDVI";
/// Band name of the appended water index
pub const NDWI_BAND: &str = "NDWI";
/// Band name of the appended water-mask ratio
pub const WATER_MASK_BAND: &str = "SWM";

/// Multi-band raster stored as (band, row, col) with its band-name ordering.
///
/// Non-finite values mark pixels outside the valid footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct BandImage {
    id: String,
    names: Vec<String>,
    data: Array3<f64>,
}

impl BandImage {
    pub fn new(id: impl Into<String>, names: Vec<String>, data: Array3<f64>) -> OpcaResult<Self> {
        let id = id.into();
        if names.len() != data.dim().0 {
            return Err(OpcaError::InvalidImage(format!(
                "{}: {} band names for {} bands",
                id,
                names.len(),
                data.dim().0
            )));
        }
        if let Some(dup) = first_duplicate(&names) {
            return Err(OpcaError::InvalidImage(format!(
                "{}: duplicate band name '{}'",
                id, dup
            )));
        }
        Ok(Self { id, names, data })
    }

    /// Build from per-band 2D layers sharing one shape
    pub fn from_bands(id: impl Into<String>, bands: Vec<(String, Array2<f64>)>) -> OpcaResult<Self> {
        let id = id.into();
        let shape = match bands.first() {
            Some((_, b)) => b.dim(),
            None => (0, 0),
        };
        let mut data = Array3::<f64>::zeros((bands.len(), shape.0, shape.1));
        let mut names = Vec::with_capacity(bands.len());
        for (i, (name, band)) in bands.into_iter().enumerate() {
            if band.dim() != shape {
                return Err(OpcaError::InvalidImage(format!(
                    "{}: band '{}' is {:?}, expected {:?}",
                    id,
                    name,
                    band.dim(),
                    shape
                )));
            }
            data.index_axis_mut(Axis(0), i).assign(&band);
            names.push(name);
        }
        Self::new(id, names, data)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn band_names(&self) -> &[String] {
        &self.names
    }

    pub fn band_count(&self) -> usize {
        self.names.len()
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.data.dim();
        (rows, cols)
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn band(&self, name: &str) -> Option<ArrayView2<'_, f64>> {
        self.band_index(name)
            .map(|i| self.data.index_axis(Axis(0), i))
    }

    fn require_band(&self, name: &str) -> OpcaResult<ArrayView2<'_, f64>> {
        self.band(name).ok_or_else(|| self.unknown_band(name))
    }

    fn unknown_band(&self, name: &str) -> OpcaError {
        OpcaError::UnknownBand {
            band: name.to_string(),
            image: self.id.clone(),
            available: self.names.clone(),
        }
    }

    /// New image with `band` appended under `name`
    pub fn with_band(self, name: &str, band: Array2<f64>) -> OpcaResult<Self> {
        if self.band_index(name).is_some() {
            return Err(OpcaError::InvalidImage(format!(
                "{}: band '{}' already exists",
                self.id, name
            )));
        }
        if band.dim() != self.shape() {
            return Err(OpcaError::InvalidImage(format!(
                "{}: band '{}' is {:?}, image is {:?}",
                self.id,
                name,
                band.dim(),
                self.shape()
            )));
        }
        let band3 = band.insert_axis(Axis(0));
        let data = ndarray::concatenate(Axis(0), &[self.data.view(), band3.view()])
            .map_err(|e| OpcaError::InvalidImage(format!("{}: {}", self.id, e)))?;
        let mut names = self.names;
        names.push(name.to_string());
        Ok(Self {
            id: self.id,
            names,
            data,
        })
    }

    /// Restrict to `names`, in the requested order
    pub fn select(&self, names: &[String]) -> OpcaResult<Self> {
        if let Some(dup) = first_duplicate(names) {
            return Err(OpcaError::InvalidImage(format!(
                "{}: band '{}' selected twice",
                self.id, dup
            )));
        }
        let indices = names
            .iter()
            .map(|n| self.band_index(n).ok_or_else(|| self.unknown_band(n)))
            .collect::<OpcaResult<Vec<_>>>()?;

        Ok(Self {
            id: self.id.clone(),
            names: names.to_vec(),
            data: self.data.select(Axis(0), &indices),
        })
    }

    /// Stack one band of every image into a date-stacked image.
    ///
    /// Band k of the result is `band` taken from `images[k]` and is named
    /// after that image's id. All images must share one shape.
    pub fn stack_band(id: impl Into<String>, images: &[BandImage], band: &str) -> OpcaResult<Self> {
        let id = id.into();
        if images.is_empty() {
            return Err(OpcaError::InvalidImage(format!("{}: nothing to stack", id)));
        }
        let layers = images
            .iter()
            .map(|image| -> OpcaResult<(String, Array2<f64>)> {
                Ok((image.id.clone(), image.require_band(band)?.to_owned()))
            })
            .collect::<OpcaResult<Vec<_>>>()?;
        log::debug!("{}: stacked '{}' from {} image(s)", id, band, layers.len());
        Self::from_bands(id, layers)
    }

    /// Keep the bands whose name matches `pattern`, in their current order
    pub fn select_matching(&self, pattern: &str) -> OpcaResult<Self> {
        let re = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| OpcaError::Config(format!("band pattern '{}': {}", pattern, e)))?;
        let names: Vec<String> = self
            .names
            .iter()
            .filter(|n| re.is_match(n))
            .cloned()
            .collect();
        self.select(&names)
    }
}

fn first_duplicate(names: &[String]) -> Option<&str> {
    names
        .iter()
        .enumerate()
        .find(|(i, n)| names[..*i].contains(n))
        .map(|(_, n)| n.as_str())
}

/// `(a - b) / (a + b)` per pixel; a zero denominator yields NaN
pub fn normalized_difference(a: &ArrayView2<'_, f64>, b: &ArrayView2<'_, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros(a.dim());
    Zip::from(&mut out).and(a).and(b).for_each(|o, &a, &b| {
        let denom = a + b;
        *o = if denom != 0.0 { (a - b) / denom } else { f64::NAN };
    });
    out
}

/// Reflectance band names for one sensor family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorBands {
    pub blue: String,
    pub green: String,
    pub red: String,
    pub nir: String,
    pub swir1: String,
    /// Pattern matching the raw reflectance bands
    pub reflectance_pattern: String,
}

impl SensorBands {
    /// Sentinel-2 MSI naming
    pub fn sentinel2() -> Self {
        Self {
            blue: "B2".to_string(),
            green: "B3".to_string(),
            red: "B4".to_string(),
            nir: "B8".to_string(),
            swir1: "B11".to_string(),
            reflectance_pattern: "B.*".to_string(),
        }
    }
}

impl Default for SensorBands {
    fn default() -> Self {
        Self::sentinel2()
    }
}

/// Which indices to append and which bands to keep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AugmentOptions {
    pub compute_ndvi: bool,
    pub compute_ndwi: bool,
    pub compute_water_mask: bool,
    /// Empty keeps every band
    pub select_bands: Vec<String>,
}

/// Appends derived index bands and applies the band selection
#[derive(Debug, Clone, Default)]
pub struct BandAugmenter {
    sensor: SensorBands,
}

impl BandAugmenter {
    pub fn new(sensor: SensorBands) -> Self {
        Self { sensor }
    }

    pub fn sensor(&self) -> &SensorBands {
        &self.sensor
    }

    /// Append NDVI, NDWI and the water mask (in that order, as enabled),
    /// then restrict to the selected bands
    pub fn augment(&self, image: BandImage, options: &AugmentOptions) -> OpcaResult<BandImage> {
        let mut image = image;

        if options.compute_ndvi {
            let ndvi = self.ndvi(&image)?;
            image = image.with_band(NDVI_BAND, ndvi)?;
        }
        if options.compute_ndwi {
            let ndwi = self.ndwi(&image)?;
            image = image.with_band(NDWI_BAND, ndwi)?;
        }
        if options.compute_water_mask {
            let swm = self.water_mask(&image)?;
            image = image.with_band(WATER_MASK_BAND, swm)?;
        }

        log::debug!("{}: bands after augmentation {:?}", image.id(), image.band_names());

        if options.select_bands.is_empty() {
            Ok(image)
        } else {
            image.select(&options.select_bands)
        }
    }

    /// Normalised difference of (nir, red)
    pub fn ndvi(&self, image: &BandImage) -> OpcaResult<Array2<f64>> {
        let nir = image.require_band(&self.sensor.nir)?;
        let red = image.require_band(&self.sensor.red)?;
        Ok(normalized_difference(&nir, &red))
    }

    /// Normalised difference of (green, nir)
    pub fn ndwi(&self, image: &BandImage) -> OpcaResult<Array2<f64>> {
        let green = image.require_band(&self.sensor.green)?;
        let nir = image.require_band(&self.sensor.nir)?;
        Ok(normalized_difference(&green, &nir))
    }

    /// `(blue + green) / (nir + swir1)`
    pub fn water_mask(&self, image: &BandImage) -> OpcaResult<Array2<f64>> {
        let blue = image.require_band(&self.sensor.blue)?;
        let green = image.require_band(&self.sensor.green)?;
        let nir = image.require_band(&self.sensor.nir)?;
        let swir1 = image.require_band(&self.sensor.swir1)?;

        let mut out = Array2::<f64>::zeros(blue.dim());
        Zip::from(&mut out)
            .and(&blue)
            .and(&green)
            .and(&nir)
            .and(&swir1)
            .for_each(|o, &b, &g, &n, &s| {
                let denom = n + s;
                *o = if denom != 0.0 { (b + g) / denom } else { f64::NAN };
            });
        Ok(out)
    }
}
