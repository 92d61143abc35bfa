//! Source models produced by initialization.
//!
//! A model is a tagged variant over point, single-component extended and
//! multi-component sources. Every component carries an SED over the frame's
//! channels and a morphology placed in the frame by its bounding box.

use ndarray::{s, Array1, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use super::frame::Frame;
use crate::image_proc::bbox::BBox;

/// One SED × morphology term of a source model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Amplitude per frame channel
    pub sed: Array1<f64>,
    /// Spatial profile, same shape as `bbox`
    pub morph: Array2<f64>,
    /// Placement of `morph` in frame pixels
    pub bbox: BBox,
}

impl Component {
    pub fn new(sed: Array1<f64>, morph: Array2<f64>, bbox: BBox) -> Self {
        debug_assert_eq!(morph.dim(), bbox.shape());
        Self { sed, morph, bbox }
    }

    /// Reason the component is unusable, if any.
    ///
    /// The SED must be finite, non-negative and not all zero; the morphology
    /// must be finite.
    pub fn defect(&self) -> Option<&'static str> {
        if self.sed.iter().any(|v| !v.is_finite()) {
            Some("non-finite SED")
        } else if self.sed.iter().any(|&v| v < 0.0) {
            Some("negative SED entry")
        } else if self.sed.iter().all(|&v| v <= 0.0) {
            Some("SED has no positive entry")
        } else if self.morph.iter().any(|v| !v.is_finite()) {
            Some("non-finite morphology")
        } else {
            None
        }
    }

    /// Longest side of the bounding box
    pub fn box_size(&self) -> usize {
        self.bbox.height.max(self.bbox.width)
    }

    /// Add this component's model (SED ⊗ morphology) into `cube`.
    fn render_into(&self, cube: &mut Array3<f64>) {
        let (_, height, width) = cube.dim();
        let clipped = self.bbox.clip((height, width));
        if clipped.is_empty() {
            return;
        }
        let oy = (clipped.y0 - self.bbox.y0) as usize;
        let ox = (clipped.x0 - self.bbox.x0) as usize;
        let morph = self
            .morph
            .slice(s![oy..oy + clipped.height, ox..ox + clipped.width]);
        let (y0, x0) = (clipped.y0 as usize, clipped.x0 as usize);

        for (mut plane, &amplitude) in cube.axis_iter_mut(Axis(0)).zip(self.sed.iter()) {
            if amplitude == 0.0 {
                continue;
            }
            plane
                .slice_mut(s![y0..y0 + clipped.height, x0..x0 + clipped.width])
                .scaled_add(amplitude, &morph);
        }
    }
}

/// Model class of an initialized source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceKind {
    /// Unresolved source: PSF-shaped morphology
    Point(Component),
    /// Single extended component
    Extended(Component),
    /// Two or more extended components
    MultiComponent(Vec<Component>),
}

/// An initialized source ready to be fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceModel {
    /// (row, col) frame position the model was built at
    pub center: (f64, f64),
    pub kind: SourceKind,
    /// Flux reaches the frame border
    pub is_edge: bool,
    /// The fitter may refine the position
    pub shifting: bool,
}

impl SourceModel {
    pub fn new(center: (f64, f64), kind: SourceKind, shifting: bool) -> Self {
        Self {
            center,
            kind,
            is_edge: false,
            shifting,
        }
    }

    pub fn components(&self) -> &[Component] {
        match &self.kind {
            SourceKind::Point(c) | SourceKind::Extended(c) => std::slice::from_ref(c),
            SourceKind::MultiComponent(cs) => cs,
        }
    }

    /// Number of extended components; 0 for a point source.
    pub fn component_count(&self) -> usize {
        match &self.kind {
            SourceKind::Point(_) => 0,
            SourceKind::Extended(_) => 1,
            SourceKind::MultiComponent(cs) => cs.len(),
        }
    }

    pub fn is_point(&self) -> bool {
        matches!(self.kind, SourceKind::Point(_))
    }

    /// Human-readable model class
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            SourceKind::Point(_) => "point",
            SourceKind::Extended(_) => "extended",
            SourceKind::MultiComponent(_) => "multi",
        }
    }

    /// Reason the model fails the validity gate, if any.
    ///
    /// Extended sources additionally need a morphology with non-zero sum.
    pub fn defect(&self) -> Option<&'static str> {
        if let Some(reason) = self.components().iter().find_map(Component::defect) {
            return Some(reason);
        }
        match &self.kind {
            SourceKind::Extended(c) if c.morph.sum() == 0.0 => Some("morphology sums to zero"),
            SourceKind::MultiComponent(cs) if cs.is_empty() => Some("no components"),
            _ => None,
        }
    }

    /// First channel with a positive SED entry, taken from the first component.
    pub fn first_positive_band(&self) -> Option<usize> {
        self.components()
            .first()
            .and_then(|c| c.sed.iter().position(|&v| v > 0.0))
    }

    /// Model cube (channel × height × width) on the frame grid.
    pub fn render(&self, frame: &Frame) -> Array3<f64> {
        let (height, width) = frame.shape();
        let mut cube = Array3::<f64>::zeros((frame.num_channels(), height, width));
        for component in self.components() {
            component.render_into(&mut cube);
        }
        cube
    }

    /// Total model flux per channel.
    pub fn flux(&self) -> Array1<f64> {
        self.components()
            .iter()
            .map(|c| &c.sed * c.morph.sum())
            .fold(None, |acc: Option<Array1<f64>>, f| match acc {
                Some(total) => Some(total + f),
                None => Some(f),
            })
            .unwrap_or_else(|| Array1::zeros(0))
    }
}
