//! Numerical helpers shared by detection and initialization.

pub mod stats;

pub use stats::{median, median_and_mad, sigma_clipped_stats, ClippedStats, MAD_TO_SIGMA};
