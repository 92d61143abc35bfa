//! Construction of individual model classes.

use thiserror::Error;

use super::frame::{Frame, Observation};
use super::model::Component;

/// Failure to construct a model class at a center.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("center ({row:.1}, {col:.1}) lies outside the {shape:?} grid")]
    OutOfBounds {
        row: f64,
        col: f64,
        shape: (usize, usize),
    },
    #[error("observation grid {observation:?} does not match frame grid {frame:?}")]
    GridMismatch {
        frame: (usize, usize),
        observation: (usize, usize),
    },
    #[error("observation has no usable weights")]
    NoWeights,
    #[error("center pixel {value:.3e} is not above the footprint cutoff {cutoff:.3e}")]
    BelowThreshold { value: f64, cutoff: f64 },
    #[error("footprint of {pixels} pixel(s) is too small to resolve")]
    Unresolved { pixels: usize },
    #[error("cannot split the footprint into {components} components: {reason}")]
    Degenerate {
        components: usize,
        reason: &'static str,
    },
    #[error("model failed the validity gate: {0}")]
    InvalidModel(&'static str),
}

/// Shape constraints applied to extended morphologies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtendedParams {
    pub symmetric: bool,
    pub monotonic: bool,
    /// Footprint threshold in units of the coadd background RMS
    pub thresh: f64,
    pub shifting: bool,
    /// Minimum relative flux drop per pixel for monotonic morphologies
    pub min_gradient: f64,
}

/// Builds point, extended and multi-component models from an observation.
///
/// `center` is a (row, col) position in frame pixels. Implementations must be
/// deterministic; the initializer may call them from several threads.
pub trait SourceBuilder {
    /// PSF-shaped component at `center`.
    fn point_source(
        &self,
        frame: &Frame,
        center: (f64, f64),
        observation: &Observation,
    ) -> Result<Component, BuildError>;

    /// One extended component.
    fn extended_source(
        &self,
        frame: &Frame,
        center: (f64, f64),
        observation: &Observation,
        params: &ExtendedParams,
    ) -> Result<Component, BuildError>;

    /// `components` (≥ 2) extended components.
    fn multi_component_source(
        &self,
        frame: &Frame,
        center: (f64, f64),
        observation: &Observation,
        params: &ExtendedParams,
        components: usize,
    ) -> Result<Vec<Component>, BuildError>;
}
