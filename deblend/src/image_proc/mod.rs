//! Image containers and processing used by detection and initialization.

pub mod bbox;
pub mod detection;
pub mod interpolation;
pub mod stack;
pub mod wavelet;
pub mod wcs;

pub use bbox::BBox;
pub use stack::{ImageStack, StackError};
pub use wavelet::{mad_wavelet, Starlet, WaveletError};
pub use wcs::Wcs;
