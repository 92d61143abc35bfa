use ndarray::{s, Axis};

use super::frame::Frame;
use super::model::SourceModel;
use super::InitError;

/// Whether the rendered model has flux within `edge_distance` pixels of the frame border.
///
/// The test uses the first channel with a positive SED entry. `None`
/// disables the test; a distance of zero is a configuration error.
pub fn has_edge_flux(
    model: &SourceModel,
    frame: &Frame,
    edge_distance: Option<usize>,
) -> Result<bool, InitError> {
    let distance = match edge_distance {
        None => return Ok(false),
        Some(0) => {
            return Err(InitError::InvalidConfig(
                "edge_distance must be positive".to_string(),
            ))
        }
        Some(d) => d,
    };
    let Some(band) = model.first_positive_band() else {
        return Ok(false);
    };

    let rendered = model.render(frame);
    let plane = rendered.index_axis(Axis(0), band);
    let (height, width) = plane.dim();
    let rows = distance.min(height);
    let cols = distance.min(width);

    let positive = |v: &f64| *v > 0.0;
    Ok(plane.slice(s![..rows, ..]).iter().any(positive)
        || plane.slice(s![height - rows.., ..]).iter().any(positive)
        || plane.slice(s![.., ..cols]).iter().any(positive)
        || plane.slice(s![.., width - cols..]).iter().any(positive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_proc::bbox::BBox;
    use crate::initialization::model::{Component, SourceKind};
    use ndarray::{array, Array2};

    fn model_at(y0: isize, x0: isize, sed: ndarray::Array1<f64>) -> SourceModel {
        let component = Component::new(sed, Array2::ones((3, 3)), BBox::new(y0, x0, 3, 3));
        SourceModel::new((0.0, 0.0), SourceKind::Extended(component), false)
    }

    fn frame() -> Frame {
        Frame::new(vec!["g".into(), "r".into()], (12, 12), None, None)
    }

    #[test]
    fn test_interior_source_not_edge() {
        let model = model_at(4, 4, array![1.0, 1.0]);
        assert!(!has_edge_flux(&model, &frame(), Some(1)).unwrap());
        assert!(!has_edge_flux(&model, &frame(), Some(4)).unwrap());
        assert!(has_edge_flux(&model, &frame(), Some(5)).unwrap());
    }

    #[test]
    fn test_each_border_detected() {
        for (y0, x0) in [(0, 4), (9, 4), (4, 0), (4, 9), (-2, -2)] {
            let model = model_at(y0, x0, array![1.0, 1.0]);
            assert!(has_edge_flux(&model, &frame(), Some(1)).unwrap(), "({y0}, {x0})");
        }
    }

    #[test]
    fn test_uses_first_positive_band() {
        let model = model_at(0, 4, array![0.0, 2.0]);
        assert!(has_edge_flux(&model, &frame(), Some(1)).unwrap());

        let dark = model_at(0, 4, array![0.0, 0.0]);
        assert!(!has_edge_flux(&dark, &frame(), Some(1)).unwrap());
    }

    #[test]
    fn test_distance_handling() {
        let model = model_at(0, 0, array![1.0, 1.0]);
        assert!(!has_edge_flux(&model, &frame(), None).unwrap());
        assert!(matches!(
            has_edge_flux(&model, &frame(), Some(0)),
            Err(InitError::InvalidConfig(_))
        ));
    }
}
