//! Per-image principal component reduction
//!
//! Each image is reduced on its own: band covariance over every valid pixel,
//! symmetric eigendecomposition, then projection of every pixel onto the
//! eigenvectors. Component `pc_i` pairs with the i-th largest eigenvalue.
//!
//! Conventions:
//! - covariance uses the sample (n - 1) normalisation
//! - projection is applied to the raw band vectors (no mean removal)
//! - each eigenvector is signed so its largest-magnitude coefficient is positive
//! - eigenvalues within tolerance of the largest value of their run count as
//!   tied; the eigenvectors of a tied run are ordered by descending
//!   lexicographic comparison of their signed coefficients

use crate::core::bands::BandImage;
use crate::types::{FailurePolicy, OpcaError, OpcaResult};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, Array3, Axis};
use std::cmp::Ordering;

/// Prefix of component band names
pub const COMPONENT_PREFIX: &str = "pc_";

pub fn component_names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{}{}", COMPONENT_PREFIX, i)).collect()
}

/// PCA reduction parameters
#[derive(Debug, Clone)]
pub struct PcaParams {
    /// Safety cap on the number of valid pixels fed to the covariance
    pub max_pixels: usize,
    /// Smallest eigenvalue relative to the largest below which the
    /// covariance counts as singular
    pub singular_tolerance: f64,
}

impl Default for PcaParams {
    fn default() -> Self {
        Self {
            max_pixels: 100_000_000,
            singular_tolerance: 1e-10,
        }
    }
}

/// Principal components of one source image
#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Component image, bands `pc_1..pc_n`
    pub components: BandImage,
    /// Input band names, in covariance order
    pub input_bands: Vec<String>,
    /// Descending
    pub eigenvalues: Vec<f64>,
    /// Row i holds the coefficients of `pc_{i+1}` over the input bands
    pub eigenvectors: Array2<f64>,
    /// Pixels that entered the covariance estimate
    pub valid_pixels: usize,
}

impl PcaResult {
    pub fn source_id(&self) -> &str {
        self.components.id()
    }

    /// Fraction of total variance carried by each component
    pub fn explained_variance_ratio(&self) -> Vec<f64> {
        let total: f64 = self.eigenvalues.iter().sum();
        self.eigenvalues.iter().map(|v| v / total).collect()
    }

    /// (name, min, max) per component over valid pixels
    pub fn component_min_max(&self) -> Vec<(String, f64, f64)> {
        self.components
            .band_names()
            .iter()
            .zip(self.components.data().axis_iter(Axis(0)))
            .map(|(name, band)| {
                let (min, max) = band
                    .iter()
                    .filter(|v| v.is_finite())
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                        (lo.min(v), hi.max(v))
                    });
                (name.clone(), min, max)
            })
            .collect()
    }
}

/// Sample covariance of the rows of `pixels` (one pixel per row, one band per column)
pub fn covariance_matrix(pixels: &Array2<f64>) -> Array2<f64> {
    let (count, _) = pixels.dim();
    let mean: Array1<f64> = pixels
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(pixels.ncols()));
    let centered = pixels - &mean;
    let denom = if count > 1 { (count - 1) as f64 } else { 1.0 };
    centered.t().dot(&centered) / denom
}

/// Flip `vector` so its largest-magnitude coefficient is positive
fn canonical_sign(mut vector: Vec<f64>) -> Vec<f64> {
    let pivot = vector
        .iter()
        .copied()
        .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
    if pivot < 0.0 {
        vector.iter_mut().for_each(|v| *v = -*v);
    }
    vector
}

/// Sort eigenpairs by descending eigenvalue with the lexicographic tie-break.
///
/// Ties are grouped on the already-sorted list, each run anchored at its
/// first (largest) value. Inside a run only the eigenvectors are reordered;
/// the returned eigenvalues stay descending and differ from their vector's
/// own eigenvalue by at most the tolerance.
pub fn order_components(
    eigenvalues: &[f64],
    eigenvectors: Vec<Vec<f64>>,
    tolerance: f64,
) -> (Vec<f64>, Vec<Vec<f64>>) {
    let scale = eigenvalues.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let mut pairs: Vec<(f64, Vec<f64>)> = eigenvalues
        .iter()
        .copied()
        .zip(eigenvectors.into_iter().map(canonical_sign))
        .collect();

    pairs.sort_by(|(va, _), (vb, _)| vb.partial_cmp(va).unwrap_or(Ordering::Equal));
    let (values, mut vectors): (Vec<f64>, Vec<Vec<f64>>) = pairs.into_iter().unzip();

    let mut start = 0;
    while start < values.len() {
        let anchor = values[start];
        let end = values[start..]
            .iter()
            .position(|v| anchor - v > tolerance * scale)
            .map_or(values.len(), |offset| start + offset);
        // Descending lexicographic on coefficients
        vectors[start..end].sort_by(|a, b| {
            b.iter()
                .zip(a.iter())
                .map(|(x, y)| x.partial_cmp(y).unwrap_or(Ordering::Equal))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        start = end;
    }

    (values, vectors)
}

/// Per-image PCA reducer
pub struct PcaReducer {
    params: PcaParams,
}

impl PcaReducer {
    pub fn new(params: PcaParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(PcaParams::default())
    }

    /// Reduce one image to `pc_1..pc_n`, n being its band count
    pub fn reduce(&self, image: &BandImage) -> OpcaResult<PcaResult> {
        let n = image.band_count();
        let (rows, cols) = image.shape();
        let degenerate = |reason: String| OpcaError::DegeneratePca {
            image: image.id().to_string(),
            reason,
        };

        if n == 0 {
            return Err(degenerate("image has no bands".to_string()));
        }

        log::info!("PCA on {} ({} bands, {}x{})", image.id(), n, rows, cols);

        // Per-pixel n-vectors
        let data = image.data();
        let npix = rows * cols;
        let pixels = Array2::from_shape_fn((npix, n), |(p, b)| data[[b, p / cols, p % cols]]);
        let valid: Vec<usize> = (0..npix)
            .filter(|&p| pixels.row(p).iter().all(|v| v.is_finite()))
            .collect();

        if valid.len() > self.params.max_pixels {
            return Err(OpcaError::PixelBudgetExceeded {
                image: image.id().to_string(),
                pixels: valid.len(),
                max_pixels: self.params.max_pixels,
            });
        }
        if valid.len() < 2 {
            return Err(degenerate(format!(
                "{} valid pixel(s), at least 2 required",
                valid.len()
            )));
        }

        let covariance = covariance_matrix(&pixels.select(Axis(0), &valid));
        log::debug!("{}: covariance {:?}", image.id(), covariance);

        let matrix = DMatrix::from_fn(n, n, |i, j| covariance[[i, j]]);
        let eigen = matrix.symmetric_eigen();
        let values: Vec<f64> = eigen.eigenvalues.iter().copied().collect();
        let vectors: Vec<Vec<f64>> = eigen
            .eigenvectors
            .column_iter()
            .map(|c| c.iter().copied().collect())
            .collect();

        let (values, vectors) = order_components(&values, vectors, self.params.singular_tolerance);

        let largest = values[0];
        let smallest = values[n - 1];
        if !(largest > 0.0) || smallest <= self.params.singular_tolerance * largest {
            return Err(degenerate(format!(
                "singular covariance (eigenvalues {:?})",
                values
            )));
        }

        let basis = Array2::from_shape_fn((n, n), |(i, j)| vectors[i][j]);
        // (npix x n) . (n x n)^T -> one component vector per pixel
        let projected = pixels.dot(&basis.t());
        let components = Array3::from_shape_fn((n, rows, cols), |(k, r, c)| {
            projected[[r * cols + c, k]]
        });
        let components = BandImage::new(image.id(), component_names(n), components)?;

        log::info!(
            "{}: eigenvalues {:?} from {} valid pixel(s)",
            image.id(),
            values,
            valid.len()
        );

        Ok(PcaResult {
            components,
            input_bands: image.band_names().to_vec(),
            eigenvalues: values,
            eigenvectors: basis,
            valid_pixels: valid.len(),
        })
    }

    /// PCA over time of a single band: every image contributes its `band`
    /// as one input band of a date-stacked image (named by image id), which
    /// is then reduced once.
    pub fn reduce_over_time(&self, images: &[BandImage], band: &str) -> OpcaResult<PcaResult> {
        let stacked = BandImage::stack_band(format!("stack/{}", band), images, band)?;
        log::info!("Temporal PCA of {} over {} date(s)", band, stacked.band_count());
        self.reduce(&stacked)
    }

    /// Independent per-image reduction over a sequence of images.
    ///
    /// Nothing is pooled across images. Results keep input order.
    pub fn reduce_temporal(
        &self,
        images: &[BandImage],
        policy: FailurePolicy,
    ) -> OpcaResult<Vec<PcaResult>> {
        #[cfg(feature = "parallel")]
        let results: Vec<OpcaResult<PcaResult>> = {
            use rayon::prelude::*;
            images.par_iter().map(|image| self.reduce(image)).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let results: Vec<OpcaResult<PcaResult>> =
            images.iter().map(|image| self.reduce(image)).collect();

        let mut out = Vec::with_capacity(results.len());
        for (index, result) in results.into_iter().enumerate() {
            match (result, policy) {
                (Ok(r), _) => out.push(r),
                (Err(e), FailurePolicy::FailFast) => return Err(e),
                (Err(e), FailurePolicy::SkipAndContinue) => {
                    log::warn!("Image {} ({}) skipped: {}", index, images[index].id(), e);
                }
            }
        }
        Ok(out)
    }
}
