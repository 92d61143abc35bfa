//! Isotropic undecimated ("starlet") wavelet transform.
//!
//! The à trous algorithm with the B3-spline kernel `[1, 4, 6, 4, 1] / 16`.
//! A decomposition with `L` levels holds `L - 1` detail planes (finest
//! first) followed by the coarse residual, so summing every plane restores
//! the input exactly. Borders are handled by mirror reflection.
//!
//! Used for band-pass filtered detection images and for robust noise
//! estimation from the finest scale.

use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use thiserror::Error;

use crate::algo::stats::{median_and_mad, MAD_TO_SIGMA};

/// B3-spline smoothing kernel
const B3_KERNEL: [f64; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Standard deviation of the finest starlet plane for unit white noise.
///
/// sqrt(1 - 2 h₀ + Σ h²) with h the 2-D B3 kernel.
pub const FINEST_SCALE_NOISE: f64 = 0.890_796;

/// Errors from wavelet decomposition
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WaveletError {
    #[error("starlet transform needs at least 2 levels, got {0}")]
    TooFewLevels(usize),
    #[error("cannot decompose an empty image of shape {0:?}")]
    EmptyImage((usize, usize)),
}

/// Starlet coefficients, shape (levels, height, width).
#[derive(Debug, Clone, PartialEq)]
pub struct Starlet {
    coefficients: Array3<f64>,
}

/// Number of levels used when none is requested: log2 of the shorter side, at least 2.
pub fn default_levels(shape: (usize, usize)) -> usize {
    let short = shape.0.min(shape.1).max(1);
    (usize::BITS - 1 - short.leading_zeros()).max(2) as usize
}

impl Starlet {
    /// Decompose `image` into `levels` planes.
    pub fn decompose(image: &ArrayView2<f64>, levels: usize) -> Result<Self, WaveletError> {
        if levels < 2 {
            return Err(WaveletError::TooFewLevels(levels));
        }
        let (height, width) = image.dim();
        if height == 0 || width == 0 {
            return Err(WaveletError::EmptyImage(image.dim()));
        }

        let mut coefficients = Array3::<f64>::zeros((levels, height, width));
        let mut current = image.to_owned();

        for level in 0..levels - 1 {
            let step = 1usize << level;
            let smoothed = smooth(&current.view(), step);
            let detail = &current - &smoothed;
            coefficients.index_axis_mut(Axis(0), level).assign(&detail);
            current = smoothed;
        }
        coefficients
            .index_axis_mut(Axis(0), levels - 1)
            .assign(&current);

        Ok(Self { coefficients })
    }

    /// Decompose with [`default_levels`].
    pub fn from_image(image: &ArrayView2<f64>) -> Result<Self, WaveletError> {
        Self::decompose(image, default_levels(image.dim()))
    }

    /// Wrap existing coefficients (e.g. after editing planes).
    pub fn from_coefficients(coefficients: Array3<f64>) -> Result<Self, WaveletError> {
        let (levels, height, width) = coefficients.dim();
        if levels < 2 {
            return Err(WaveletError::TooFewLevels(levels));
        }
        if height == 0 || width == 0 {
            return Err(WaveletError::EmptyImage((height, width)));
        }
        Ok(Self { coefficients })
    }

    pub fn levels(&self) -> usize {
        self.coefficients.len_of(Axis(0))
    }

    pub fn coefficients(&self) -> ArrayView3<'_, f64> {
        self.coefficients.view()
    }

    /// Zero the coarse residual, leaving a band-pass representation.
    pub fn zero_coarse(&mut self) {
        let last = self.levels() - 1;
        self.coefficients.index_axis_mut(Axis(0), last).fill(0.0);
    }

    /// Sum of the `count` finest detail planes (clamped to the available ones).
    pub fn detail_sum(&self, count: usize) -> Array2<f64> {
        let count = count.min(self.levels() - 1);
        self.coefficients
            .slice(s![..count, .., ..])
            .sum_axis(Axis(0))
    }

    /// Reconstructed image: the sum of all planes.
    pub fn image(&self) -> Array2<f64> {
        self.coefficients.sum_axis(Axis(0))
    }
}

/// Reflect an out-of-range index back into `0..n` without repeating the edge pixel.
fn mirror_index(index: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let m = index.rem_euclid(period);
    if m >= n as isize {
        (period - m) as usize
    } else {
        m as usize
    }
}

/// Separable B3-spline smoothing with holes of size `step`.
fn smooth(image: &ArrayView2<f64>, step: usize) -> Array2<f64> {
    let (height, width) = image.dim();
    let step = step as isize;

    let mut rows = Array2::<f64>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in B3_KERNEL.iter().enumerate() {
                let offset = (k as isize - 2) * step;
                acc += weight * image[[y, mirror_index(x as isize + offset, width)]];
            }
            rows[[y, x]] = acc;
        }
    }

    let mut out = Array2::<f64>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in B3_KERNEL.iter().enumerate() {
                let offset = (k as isize - 2) * step;
                acc += weight * rows[[mirror_index(y as isize + offset, height), x]];
            }
            out[[y, x]] = acc;
        }
    }
    out
}

/// Robust per-band noise RMS from the finest starlet scale.
///
/// For each band the median absolute deviation of the first detail plane is
/// converted to a Gaussian sigma and rescaled by [`FINEST_SCALE_NOISE`], giving
/// the pixel noise of the input. Bands too small to decompose yield NaN.
pub fn mad_wavelet(images: &ArrayView3<f64>) -> Array1<f64> {
    images
        .axis_iter(Axis(0))
        .map(|band| {
            let finest = match Starlet::decompose(&band, 2) {
                Ok(starlet) => starlet.coefficients.index_axis_move(Axis(0), 0),
                Err(e) => {
                    log::warn!("noise estimate unavailable: {e}");
                    return f64::NAN;
                }
            };
            let values: Vec<f64> = finest.iter().copied().collect();
            match median_and_mad(&values) {
                Ok((_, mad)) => mad * MAD_TO_SIGMA / FINEST_SCALE_NOISE,
                Err(_) => f64::NAN,
            }
        })
        .collect()
}
