//! Source detection: background estimation, thresholding, peak extraction
//! and catalog construction from image stacks.

pub mod background;
pub mod catalog;
pub mod extract;
pub mod thresholding;

use thiserror::Error;

use crate::image_proc::wavelet::WaveletError;

pub use background::Background;
pub use catalog::{
    build_catalog, build_catalog_with, detect_in_image, detection_image, CatalogConfig,
    DetectionImage, NoiseEstimate,
};
pub use extract::{CatalogEntry, PeakDetector, SourceCatalog, ThresholdDetector};
pub use thresholding::{component_extents, connected_components, threshold_mask, Connectivity};

/// Errors raised while building a detection catalog
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("expected one stack or a (low, high) resolution pair, got {0} stacks")]
    InvalidStackCount(usize),
    #[error("stack '{0}' has no WCS, cannot resample the resolution pair")]
    MissingWcs(String),
    #[error("detection threshold must be finite and non-negative, got {0}")]
    InvalidThreshold(f64),
    #[error("detection image has no bands")]
    EmptyDetectionImage,
    #[error("wavelet filtering failed: {0}")]
    Wavelet(#[from] WaveletError),
}
