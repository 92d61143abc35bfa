//! Multi-band image stacks.
//!
//! An [`ImageStack`] bundles the pixel cube of one exposure set (one per
//! instrument or resolution tier) together with its PSFs, coordinate mapping
//! and band labels. Stacks are validated once on construction and are
//! read-only afterwards.

use ndarray::{Array3, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::wcs::Wcs;

/// Errors raised while assembling an image stack
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StackError {
    #[error("image cube has no bands or an empty spatial extent: {0:?}")]
    EmptyCube((usize, usize, usize)),
    #[error("{what} count {found} does not match the {bands} bands of the cube")]
    BandCountMismatch {
        what: &'static str,
        found: usize,
        bands: usize,
    },
    #[error("cube shape {found:?} does not match the expected {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
}

/// One observed exposure set: cube (band × height × width), PSFs, WCS and band labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageStack {
    name: String,
    images: Array3<f64>,
    psfs: Option<Array3<f64>>,
    wcs: Option<Wcs>,
    channels: Vec<String>,
}

impl ImageStack {
    /// Build a stack, checking that PSFs and labels agree with the cube's band count.
    pub fn new(
        name: impl Into<String>,
        images: Array3<f64>,
        psfs: Option<Array3<f64>>,
        wcs: Option<Wcs>,
        channels: Vec<String>,
    ) -> Result<Self, StackError> {
        let (bands, height, width) = images.dim();
        if bands == 0 || height == 0 || width == 0 {
            return Err(StackError::EmptyCube(images.dim()));
        }
        if channels.len() != bands {
            return Err(StackError::BandCountMismatch {
                what: "channel label",
                found: channels.len(),
                bands,
            });
        }
        if let Some(psfs) = &psfs {
            if psfs.len_of(Axis(0)) != bands {
                return Err(StackError::BandCountMismatch {
                    what: "PSF",
                    found: psfs.len_of(Axis(0)),
                    bands,
                });
            }
        }

        Ok(Self {
            name: name.into(),
            images,
            psfs,
            wcs,
            channels,
        })
    }

    /// Stack with generated band labels (`b0`, `b1`, ...) and no PSF or WCS.
    pub fn from_cube(name: impl Into<String>, images: Array3<f64>) -> Result<Self, StackError> {
        let channels = (0..images.len_of(Axis(0)))
            .map(|b| format!("b{b}"))
            .collect();
        Self::new(name, images, None, None, channels)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn images(&self) -> ArrayView3<'_, f64> {
        self.images.view()
    }

    pub fn band(&self, band: usize) -> ArrayView2<'_, f64> {
        self.images.index_axis(Axis(0), band)
    }

    pub fn psfs(&self) -> Option<ArrayView3<'_, f64>> {
        self.psfs.as_ref().map(|p| p.view())
    }

    pub fn wcs(&self) -> Option<&Wcs> {
        self.wcs.as_ref()
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn num_bands(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    /// Spatial shape as (height, width)
    pub fn shape(&self) -> (usize, usize) {
        let (_, h, w) = self.images.dim();
        (h, w)
    }

    /// Sum of all pixels across every band
    pub fn total_flux(&self) -> f64 {
        self.images.sum()
    }

    /// Copy of this stack with the pixel data replaced.
    pub fn with_images(&self, images: Array3<f64>) -> Result<Self, StackError> {
        Self::new(
            self.name.clone(),
            images,
            self.psfs.clone(),
            self.wcs.clone(),
            self.channels.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_count_checked() {
        let cube = Array3::<f64>::zeros((3, 8, 8));
        let err = ImageStack::new("hsc", cube, None, None, vec!["g".into(), "r".into()])
            .unwrap_err();
        assert_eq!(
            err,
            StackError::BandCountMismatch {
                what: "channel label",
                found: 2,
                bands: 3
            }
        );
    }

    #[test]
    fn test_psf_count_checked() {
        let cube = Array3::<f64>::zeros((2, 8, 8));
        let psfs = Array3::<f64>::zeros((1, 5, 5));
        let err = ImageStack::new("hst", cube, Some(psfs), None, vec!["a".into(), "b".into()]);
        assert!(matches!(err, Err(StackError::BandCountMismatch { what: "PSF", .. })));
    }

    #[test]
    fn test_empty_cube_rejected() {
        let cube = Array3::<f64>::zeros((0, 8, 8));
        assert!(matches!(
            ImageStack::from_cube("empty", cube),
            Err(StackError::EmptyCube(_))
        ));
    }

    #[test]
    fn test_accessors() {
        let cube = Array3::from_shape_fn((2, 4, 5), |(b, y, x)| (b * 100 + y * 10 + x) as f64);
        let stack = ImageStack::from_cube("cube", cube).unwrap();
        assert_eq!(stack.channels(), ["b0", "b1"]);
        assert_eq!(stack.shape(), (4, 5));
        assert_eq!(stack.band(1)[[2, 3]], 123.0);
        assert!(stack.wcs().is_none());
    }
}
