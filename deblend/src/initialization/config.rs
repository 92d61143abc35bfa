use serde::{Deserialize, Serialize};

use super::InitError;

/// Largest component count a first attempt may start from
pub const MAX_COMPONENTS: usize = 16;

/// Options for initializing one source model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// Force 180° rotational symmetry of the morphology
    pub symmetric: bool,
    /// Force flux to decrease monotonically away from the center
    pub monotonic: bool,
    /// Footprint threshold in units of the coadd background RMS
    pub thresh: f64,
    /// Component count of the first attempt (0 = point source)
    pub max_components: usize,
    /// Border margin in pixels for the edge test; `None` disables it
    pub edge_distance: Option<usize>,
    /// Allow the fitter to refine the source position
    pub shifting: bool,
    /// Reduce the component count of sources in small boxes
    pub downgrade: bool,
    /// Retry with fewer components when construction fails
    pub fallback: bool,
    /// Minimum relative flux drop per pixel for monotonic morphologies
    pub min_gradient: f64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            symmetric: false,
            monotonic: true,
            thresh: 1.0,
            max_components: 1,
            edge_distance: Some(1),
            shifting: false,
            downgrade: true,
            fallback: true,
            min_gradient: 0.0,
        }
    }
}

impl InitConfig {
    /// Check the options before any model is built.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.max_components > MAX_COMPONENTS {
            return Err(InitError::InvalidConfig(format!(
                "max_components must be at most {MAX_COMPONENTS}, got {}",
                self.max_components
            )));
        }
        if self.edge_distance == Some(0) {
            return Err(InitError::InvalidConfig(
                "edge_distance must be positive (use None to disable the edge test)".to_string(),
            ));
        }
        if !self.thresh.is_finite() || self.thresh < 0.0 {
            return Err(InitError::InvalidConfig(format!(
                "thresh must be finite and non-negative, got {}",
                self.thresh
            )));
        }
        if !(0.0..1.0).contains(&self.min_gradient) {
            return Err(InitError::InvalidConfig(format!(
                "min_gradient must lie in [0, 1), got {}",
                self.min_gradient
            )));
        }
        Ok(())
    }
}
