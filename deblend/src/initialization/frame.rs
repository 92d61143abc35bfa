//! Model frame and weighted observations.

use ndarray::{Array2, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::image_proc::detection::NoiseEstimate;
use crate::image_proc::stack::{ImageStack, StackError};
use crate::image_proc::wcs::Wcs;

/// Grid and channel layout the source models live on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    channels: Vec<String>,
    shape: (usize, usize),
    psf: Option<Array2<f64>>,
    wcs: Option<Wcs>,
}

impl Frame {
    pub fn new(
        channels: Vec<String>,
        shape: (usize, usize),
        psf: Option<Array2<f64>>,
        wcs: Option<Wcs>,
    ) -> Self {
        Self {
            channels,
            shape,
            psf,
            wcs,
        }
    }

    /// Frame covering a set of observations.
    ///
    /// Channels are concatenated in observation order (duplicates kept once).
    /// The spatial grid is taken from the observation with the finest pixel
    /// scale, or from the last one when any observation lacks a WCS.
    pub fn from_observations(
        observations: &[Observation],
        model_psf: Option<Array2<f64>>,
    ) -> Option<Self> {
        let reference = finest_observation(observations)?;
        let reference = &observations[reference];

        let mut channels: Vec<String> = Vec::new();
        for channel in observations.iter().flat_map(|o| o.channels.iter()) {
            if !channels.contains(channel) {
                channels.push(channel.clone());
            }
        }

        Some(Self::new(
            channels,
            reference.shape(),
            model_psf,
            reference.wcs.clone(),
        ))
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Spatial shape (height, width)
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn psf(&self) -> Option<&Array2<f64>> {
        self.psf.as_ref()
    }

    pub fn wcs(&self) -> Option<&Wcs> {
        self.wcs.as_ref()
    }

    /// Frame index of each channel of `channels`, `None` for unknown labels.
    pub fn channel_indices(&self, channels: &[String]) -> Vec<Option<usize>> {
        channels
            .iter()
            .map(|c| self.channels.iter().position(|f| f == c))
            .collect()
    }
}

/// Index of the observation whose grid a frame should use.
pub fn finest_observation(observations: &[Observation]) -> Option<usize> {
    if observations.is_empty() {
        return None;
    }
    let scales: Option<Vec<f64>> = observations
        .iter()
        .map(|o| o.wcs.as_ref().map(Wcs::pixel_scale_arcsec))
        .collect();
    match scales {
        Some(scales) => scales
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i),
        None => Some(observations.len() - 1),
    }
}

/// Images of one stack with per-pixel inverse-variance weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub name: String,
    images: Array3<f64>,
    weights: Array3<f64>,
    psfs: Option<Array3<f64>>,
    channels: Vec<String>,
    wcs: Option<Wcs>,
}

impl Observation {
    /// Observation of `stack` weighted by `1 / rms²` per band.
    ///
    /// Bands whose RMS is not finite and positive get zero weight.
    pub fn from_stack(stack: &ImageStack, noise: &NoiseEstimate) -> Result<Self, StackError> {
        let bands = stack.num_bands();
        if noise.rms.len() != bands {
            return Err(StackError::BandCountMismatch {
                what: "noise estimate",
                found: noise.rms.len(),
                bands,
            });
        }

        let (height, width) = stack.shape();
        let mut weights = Array3::<f64>::zeros((bands, height, width));
        for (band, (mut plane, &rms)) in weights
            .axis_iter_mut(Axis(0))
            .zip(noise.rms.iter())
            .enumerate()
        {
            if rms.is_finite() && rms > 0.0 {
                plane.fill(1.0 / (rms * rms));
            } else {
                log::warn!(
                    "band {band} of '{}' has noise rms {rms}, weighting it out",
                    stack.name()
                );
            }
        }

        Ok(Self {
            name: stack.name().to_string(),
            images: stack.images().to_owned(),
            weights,
            psfs: stack.psfs().map(|p| p.to_owned()),
            channels: stack.channels().to_vec(),
            wcs: stack.wcs().cloned(),
        })
    }

    /// Observation with unit weights.
    pub fn unweighted(stack: &ImageStack) -> Self {
        Self {
            name: stack.name().to_string(),
            images: stack.images().to_owned(),
            weights: Array3::ones(stack.images().dim()),
            psfs: stack.psfs().map(|p| p.to_owned()),
            channels: stack.channels().to_vec(),
            wcs: stack.wcs().cloned(),
        }
    }

    pub fn images(&self) -> ArrayView3<'_, f64> {
        self.images.view()
    }

    pub fn weights(&self) -> ArrayView3<'_, f64> {
        self.weights.view()
    }

    pub fn psfs(&self) -> Option<ArrayView3<'_, f64>> {
        self.psfs.as_ref().map(|p| p.view())
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn wcs(&self) -> Option<&Wcs> {
        self.wcs.as_ref()
    }

    pub fn num_bands(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    /// Spatial shape (height, width)
    pub fn shape(&self) -> (usize, usize) {
        let (_, h, w) = self.images.dim();
        (h, w)
    }

    /// Replace the pixel data, keeping weights and metadata.
    pub fn set_images(&mut self, images: Array3<f64>) -> Result<(), StackError> {
        if images.dim() != self.images.dim() {
            return Err(StackError::ShapeMismatch {
                expected: self.images.dim(),
                found: images.dim(),
            });
        }
        self.images = images;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn stack(name: &str, shape: (usize, usize), scale: f64, channels: &[&str]) -> ImageStack {
        let wcs = Wcs::from_scale((0.0, 0.0), (10.0, 5.0), scale);
        ImageStack::new(
            name,
            Array3::ones((channels.len(), shape.0, shape.1)),
            None,
            Some(wcs),
            channels.iter().map(|c| c.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_weights_are_inverse_variance() {
        let hsc = stack("hsc", (4, 4), 1e-4, &["g", "r"]);
        let noise = NoiseEstimate {
            stack: "hsc".into(),
            rms: array![2.0, f64::NAN],
        };
        let obs = Observation::from_stack(&hsc, &noise).unwrap();
        assert_eq!(obs.weights()[[0, 1, 1]], 0.25);
        assert_eq!(obs.weights()[[1, 1, 1]], 0.0);
    }

    #[test]
    fn test_noise_band_count_checked() {
        let hsc = stack("hsc", (4, 4), 1e-4, &["g", "r"]);
        let noise = NoiseEstimate {
            stack: "hsc".into(),
            rms: array![1.0],
        };
        assert!(Observation::from_stack(&hsc, &noise).is_err());
    }

    #[test]
    fn test_frame_uses_finest_grid() {
        let low = Observation::unweighted(&stack("hsc", (8, 8), 4e-5, &["g", "r"]));
        let high = Observation::unweighted(&stack("hst", (32, 32), 1e-5, &["F814W"]));
        let frame = Frame::from_observations(&[low, high], None).unwrap();

        assert_eq!(frame.shape(), (32, 32));
        assert_eq!(frame.channels(), ["g", "r", "F814W"]);
        assert_eq!(
            frame.channel_indices(&["F814W".to_string(), "z".to_string()]),
            vec![Some(2), None]
        );
        assert!(Frame::from_observations(&[], None).is_none());
    }
}
