//! Detection catalog from one stack or a low/high resolution pair.
//!
//! Bands are normalized by their total flux and summed into a single
//! detection plane (a low-resolution tier is first resampled onto the
//! high-resolution grid). The plane is optionally band-pass filtered with the
//! starlet transform before peaks are extracted, and a per-band noise estimate
//! is computed for every input stack.

use ndarray::{Array1, Array2, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use super::background::MIN_RELATIVE_RMS;
use super::extract::{PeakDetector, SourceCatalog, ThresholdDetector};
use super::DetectionError;
use crate::image_proc::interpolation::resample_to_grid;
use crate::image_proc::stack::ImageStack;
use crate::image_proc::wavelet::{mad_wavelet, Starlet};

/// Detection image before filtering.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionImage {
    /// Single plane (height × width)
    Plane(Array2<f64>),
    /// Band cube (band × height × width), averaged over bands before extraction
    Cube(Array3<f64>),
}

impl DetectionImage {
    /// Spatial shape (height, width)
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Plane(plane) => plane.dim(),
            Self::Cube(cube) => {
                let (_, h, w) = cube.dim();
                (h, w)
            }
        }
    }
}

/// Robust background RMS of every band of one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseEstimate {
    /// Name of the stack the estimate belongs to
    pub stack: String,
    /// RMS per band
    pub rms: Array1<f64>,
}

/// Settings for building a detection catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Detection threshold in units of the background RMS
    pub level: f64,
    /// Band-pass filter the detection image with the starlet transform
    pub use_wavelet: bool,
    /// Number of finest detail planes summed for a plane detection image
    pub detail_planes: usize,
    /// Number of starlet levels used for a cube detection image
    pub cube_levels: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            level: 3.0,
            use_wavelet: true,
            detail_planes: 3,
            cube_levels: 4,
        }
    }
}

/// Build a catalog with the default [`ThresholdDetector`].
///
/// `stacks` holds either one stack or a (low resolution, high resolution)
/// pair. Returns the catalog and one noise estimate per stack.
pub fn build_catalog(
    stacks: &[ImageStack],
    level: f64,
    use_wavelet: bool,
) -> Result<(SourceCatalog, Vec<NoiseEstimate>), DetectionError> {
    let config = CatalogConfig {
        level,
        use_wavelet,
        ..CatalogConfig::default()
    };
    build_catalog_with(stacks, &config, &ThresholdDetector::default())
}

/// Build a catalog with explicit settings and peak detector.
pub fn build_catalog_with(
    stacks: &[ImageStack],
    config: &CatalogConfig,
    detector: &dyn PeakDetector,
) -> Result<(SourceCatalog, Vec<NoiseEstimate>), DetectionError> {
    let image = detection_image(stacks)?;
    let catalog = detect_in_image(&image, config, detector)?;

    let noise = stacks
        .iter()
        .map(|stack| NoiseEstimate {
            stack: stack.name().to_string(),
            rms: mad_wavelet(&stack.images()),
        })
        .collect();

    log::info!(
        "catalog: {} sources from {} stack(s) at level {}",
        catalog.len(),
        stacks.len(),
        config.level
    );
    Ok((catalog, noise))
}

/// Combine the stacks into one flux-normalized detection plane.
pub fn detection_image(stacks: &[ImageStack]) -> Result<DetectionImage, DetectionError> {
    match stacks {
        [single] => Ok(DetectionImage::Plane(normalized_band_sum(
            &single.images(),
            single.name(),
        ))),
        [low, high] => {
            let resampled = resample_to_grid(low, high).ok_or_else(|| {
                let missing = if low.wcs().is_none() { low } else { high };
                DetectionError::MissingWcs(missing.name().to_string())
            })?;
            let mut plane = normalized_band_sum(&resampled.view(), low.name());
            plane += &normalized_band_sum(&high.images(), high.name());
            plane *= high.total_flux();
            Ok(DetectionImage::Plane(plane))
        }
        _ => Err(DetectionError::InvalidStackCount(stacks.len())),
    }
}

/// Filter a detection image and extract peaks from it.
///
/// A detection image without structure, or whose background RMS is zero,
/// yields an empty catalog.
pub fn detect_in_image(
    image: &DetectionImage,
    config: &CatalogConfig,
    detector: &dyn PeakDetector,
) -> Result<SourceCatalog, DetectionError> {
    let plane = match image {
        DetectionImage::Plane(plane) => plane.clone(),
        DetectionImage::Cube(cube) => cube
            .mean_axis(Axis(0))
            .ok_or(DetectionError::EmptyDetectionImage)?,
    };
    if is_flat(&plane) {
        log::debug!("detection image is flat, nothing to extract");
        return Ok(SourceCatalog::default());
    }
    let detect = filter_plane(plane, matches!(image, DetectionImage::Cube(_)), config)?;

    let background = detector.estimate_background(&detect.view());
    log::debug!(
        "detection background {:.4e} ± {:.4e}",
        background.level,
        background.rms
    );
    if background.rms.is_nan() || background.rms <= 0.0 {
        log::debug!("detection background has no noise floor, nothing to extract");
        return Ok(SourceCatalog::default());
    }
    let subtracted = detect - background.level;
    detector.extract_peaks(&subtracted.view(), config.level, background.rms)
}

/// Peak-to-peak range within rounding of the largest magnitude.
fn is_flat(plane: &Array2<f64>) -> bool {
    let (min, max) = plane
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if min > max {
        return true;
    }
    max - min <= MIN_RELATIVE_RMS * min.abs().max(max.abs())
}

/// Plane handed to the peak detector.
///
/// `from_cube` selects the band-averaged filtering: the coarsest of
/// `cube_levels` scales is dropped instead of summing the finest details.
fn filter_plane(
    plane: Array2<f64>,
    from_cube: bool,
    config: &CatalogConfig,
) -> Result<Array2<f64>, DetectionError> {
    match (from_cube, config.use_wavelet) {
        (_, false) => Ok(plane),
        (false, true) => {
            let starlet = Starlet::from_image(&plane.view())?;
            Ok(starlet.detail_sum(config.detail_planes))
        }
        (true, true) => {
            let mut starlet = Starlet::decompose(&plane.view(), config.cube_levels)?;
            starlet.zero_coarse();
            Ok(starlet.image())
        }
    }
}

/// Sum of the bands of `cube`, each divided by its total flux.
fn normalized_band_sum(cube: &ArrayView3<f64>, stack: &str) -> Array2<f64> {
    let (_, height, width) = cube.dim();
    let mut sum = Array2::<f64>::zeros((height, width));
    for (index, band) in cube.axis_iter(Axis(0)).enumerate() {
        let total = band.sum();
        if total.is_finite() && total > 0.0 {
            sum.scaled_add(1.0 / total, &band);
        } else {
            log::warn!("band {index} of stack '{stack}' has total flux {total}, left unscaled");
            sum += &band;
        }
    }
    sum
}
