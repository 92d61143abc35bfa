//! Global sky background estimation.
//!
//! The background level and RMS are taken from sigma-clipped statistics of
//! every finite pixel, which rejects the sources themselves from the
//! estimate. Detection images are small cutouts around a blend, so a single
//! global estimate is used rather than a tiled map.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::algo::stats::sigma_clipped_stats;

/// Default clipping threshold in units of sigma
pub const DEFAULT_CLIP_SIGMA: f64 = 3.0;

/// Default maximum number of clipping passes
pub const DEFAULT_CLIP_ITERATIONS: usize = 10;

/// Clipped RMS at or below this fraction of the largest deviation from the
/// level is rounding noise of a noiseless image
pub const MIN_RELATIVE_RMS: f64 = 1e-9;

/// Global background level and RMS of a detection image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Background {
    /// Sky level (clipped median)
    pub level: f64,
    /// Background noise RMS (clipped MAD sigma)
    pub rms: f64,
}

impl Background {
    /// Estimate background with custom clipping parameters.
    ///
    /// When more than half the pixels sit exactly on the level (a noiseless
    /// background) the clipped RMS collapses to zero. The RMS of every pixel
    /// about the level is used instead, so the cut stays above rounding noise.
    pub fn estimate_with(image: &ArrayView2<f64>, kappa: f64, iterations: usize) -> Self {
        let values: Vec<f64> = image.iter().copied().filter(|v| v.is_finite()).collect();
        let stats = sigma_clipped_stats(&values, kappa, iterations);
        log::debug!(
            "background level {:.4e}, rms {:.4e} from {} of {} pixels",
            stats.median,
            stats.sigma,
            stats.count,
            values.len()
        );

        let max_deviation = values
            .iter()
            .map(|v| (v - stats.median).abs())
            .fold(0.0, f64::max);
        let rms = if stats.sigma > MIN_RELATIVE_RMS * max_deviation {
            stats.sigma
        } else {
            let rms = unclipped_rms(&values, stats.median);
            log::debug!("clipped rms {:.4e} is degenerate, using {rms:.4e}", stats.sigma);
            rms
        };

        Self {
            level: stats.median,
            rms,
        }
    }

    /// Estimate background with 3-sigma clipping.
    pub fn estimate(image: &ArrayView2<f64>) -> Self {
        Self::estimate_with(image, DEFAULT_CLIP_SIGMA, DEFAULT_CLIP_ITERATIONS)
    }
}

/// Root mean square deviation of `values` from `level`.
fn unclipped_rms(values: &[f64], level: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - level).powi(2)).sum();
    (sum_sq / values.len() as f64).sqrt()
}
