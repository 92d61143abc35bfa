//! Per-center initialization with component-count fallback.
//!
//! Model classes are tried from most to least expressive: multi-component
//! models from `max_components` down to two, then a single extended
//! component, then a point source. The first model that passes the validity
//! gate is accepted. An accepted model with flux on the frame border is
//! rebuilt once with position shifting enabled.

use rayon::prelude::*;

use super::builder::{BuildError, ExtendedParams, SourceBuilder};
use super::config::InitConfig;
use super::edge::has_edge_flux;
use super::frame::{Frame, Observation};
use super::model::{SourceKind, SourceModel};
use super::InitError;

/// Box side at or below which a source is treated as unresolved
const POINT_BOX_SIZE: usize = 8;

/// Box side at or below which a source gets at most one component
const SINGLE_BOX_SIZE: usize = 16;

/// Position in the fallback sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Multi(usize),
    Single,
    Point,
}

impl Attempt {
    fn starting_at(components: usize) -> Self {
        match components {
            0 => Self::Point,
            1 => Self::Single,
            k => Self::Multi(k),
        }
    }

    fn components(self) -> usize {
        match self {
            Self::Multi(k) => k,
            Self::Single => 1,
            Self::Point => 0,
        }
    }

    /// Next, less expressive attempt; `None` after the point source.
    fn fallback(self) -> Option<Self> {
        match self {
            Self::Multi(k) if k > 2 => Some(Self::Multi(k - 1)),
            Self::Multi(_) => Some(Self::Single),
            Self::Single => Some(Self::Point),
            Self::Point => None,
        }
    }
}

/// Accepted model of one pass with the component count later passes should use.
struct Accepted {
    model: SourceModel,
    target: usize,
}

/// Initialize the source at `center` (row, col in frame pixels).
///
/// Returns `Ok(None)` when no model class can be built, which callers record
/// as a skipped center. With `fallback` disabled a construction failure is
/// returned as [`InitError::Construction`] instead.
pub fn init_source<B>(
    frame: &Frame,
    center: (f64, f64),
    observation: &Observation,
    builder: &B,
    config: &InitConfig,
) -> Result<Option<SourceModel>, InitError>
where
    B: SourceBuilder + ?Sized,
{
    config.validate()?;

    let Some(first) = build_pass(
        frame,
        center,
        observation,
        builder,
        config,
        config.max_components,
        config.shifting,
    )?
    else {
        return Ok(None);
    };

    let is_edge = has_edge_flux(&first.model, frame, config.edge_distance)?;
    if !is_edge || first.model.is_point() || config.shifting {
        let mut model = first.model;
        model.is_edge = is_edge;
        return Ok(Some(model));
    }

    log::debug!(
        "source at {center:?} has edge flux, rebuilding with {} component(s) and shifting",
        first.target
    );
    let rebuilt = build_pass(
        frame,
        center,
        observation,
        builder,
        config,
        first.target,
        true,
    )?;
    match rebuilt {
        Some(second) => {
            let mut model = second.model;
            model.is_edge = has_edge_flux(&model, frame, config.edge_distance)?;
            Ok(Some(model))
        }
        None => Ok(None),
    }
}

/// One walk down the fallback sequence starting at `components`.
fn build_pass<B>(
    frame: &Frame,
    center: (f64, f64),
    observation: &Observation,
    builder: &B,
    config: &InitConfig,
    components: usize,
    shifting: bool,
) -> Result<Option<Accepted>, InitError>
where
    B: SourceBuilder + ?Sized,
{
    let params = ExtendedParams {
        symmetric: config.symmetric,
        monotonic: config.monotonic,
        thresh: config.thresh,
        shifting,
        min_gradient: config.min_gradient,
    };

    let mut attempt = Attempt::starting_at(components);
    loop {
        let built = match attempt {
            Attempt::Multi(k) => builder
                .multi_component_source(frame, center, observation, &params, k)
                .map(SourceKind::MultiComponent),
            Attempt::Single => builder
                .extended_source(frame, center, observation, &params)
                .map(SourceKind::Extended),
            Attempt::Point => builder
                .point_source(frame, center, observation)
                .map(SourceKind::Point),
        };

        let outcome = built.and_then(|kind| {
            // Point sources may always move
            let model = SourceModel::new(center, kind, shifting || attempt == Attempt::Point);
            match model.defect() {
                Some(reason) => Err(BuildError::InvalidModel(reason)),
                None => Ok(model),
            }
        });

        match outcome {
            Ok(model) => {
                log::debug!(
                    "initialized {} source at {center:?} with {} component(s)",
                    model.kind_name(),
                    model.component_count()
                );
                return accept(model, frame, config).map(Some);
            }
            Err(source) => {
                if !config.fallback {
                    return Err(InitError::Construction {
                        center,
                        components: attempt.components(),
                        source,
                    });
                }
                match attempt.fallback() {
                    Some(next) => {
                        log::warn!(
                            "could not initialize source at {center:?} with {} component(s): {source}",
                            attempt.components()
                        );
                        attempt = next;
                    }
                    None => {
                        log::warn!(
                            "could not initialize source at {center:?} as a point source: {source}"
                        );
                        return Ok(None);
                    }
                }
            }
        }
    }
}

/// Apply the box-size downgrade, or flag an edge model for shifting.
fn accept(
    mut model: SourceModel,
    frame: &Frame,
    config: &InitConfig,
) -> Result<Accepted, InitError> {
    let count = model.component_count();
    if count == 0 {
        return Ok(Accepted { model, target: 0 });
    }

    let fits_in = |size: usize| model.components().iter().all(|c| c.box_size() <= size);
    let downgraded = if !config.downgrade {
        None
    } else if count > 1 && fits_in(POINT_BOX_SIZE) {
        Some(0)
    } else if fits_in(SINGLE_BOX_SIZE) {
        Some(if count > 1 { 1 } else { 0 })
    } else {
        None
    };

    match downgraded {
        Some(target) => {
            log::debug!(
                "source at {:?} fits a small box, later attempts use {target} component(s)",
                model.center
            );
            Ok(Accepted { model, target })
        }
        None => {
            if has_edge_flux(&model, frame, config.edge_distance)? {
                model.shifting = true;
            }
            Ok(Accepted {
                model,
                target: count,
            })
        }
    }
}

/// Initialize every center in order.
///
/// Returns the models and the ascending indices of centers without a model,
/// so `models.len() + skipped.len() == centers.len()`.
pub fn init_all_sources<B>(
    frame: &Frame,
    centers: &[(f64, f64)],
    observation: &Observation,
    builder: &B,
    config: &InitConfig,
) -> Result<(Vec<SourceModel>, Vec<usize>), InitError>
where
    B: SourceBuilder + ?Sized,
{
    config.validate()?;

    let mut sources = Vec::with_capacity(centers.len());
    let mut skipped = Vec::new();
    for (index, &center) in centers.iter().enumerate() {
        match init_source(frame, center, observation, builder, config)? {
            Some(model) => sources.push(model),
            None => skipped.push(index),
        }
    }
    log_batch(centers.len(), &skipped);
    Ok((sources, skipped))
}

/// [`init_all_sources`] with centers processed in parallel.
///
/// Ordering and skip indices match the sequential driver.
pub fn par_init_all_sources<B>(
    frame: &Frame,
    centers: &[(f64, f64)],
    observation: &Observation,
    builder: &B,
    config: &InitConfig,
) -> Result<(Vec<SourceModel>, Vec<usize>), InitError>
where
    B: SourceBuilder + Sync + ?Sized,
{
    config.validate()?;

    let results: Vec<Option<SourceModel>> = centers
        .par_iter()
        .map(|&center| init_source(frame, center, observation, builder, config))
        .collect::<Result<_, _>>()?;

    let mut sources = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Some(model) => sources.push(model),
            None => skipped.push(index),
        }
    }
    log_batch(centers.len(), &skipped);
    Ok((sources, skipped))
}

fn log_batch(total: usize, skipped: &[usize]) {
    if skipped.is_empty() {
        log::info!("initialized all {total} sources");
    } else {
        log::info!(
            "initialized {} of {total} sources, skipped {:?}",
            total - skipped.len(),
            skipped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_proc::bbox::BBox;
    use crate::image_proc::stack::ImageStack;
    use crate::initialization::coadd::CoaddBuilder;
    use crate::initialization::model::Component;
    use ndarray::{array, Array2, Array3};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Multi(usize, bool),
        Single(bool),
        Point,
    }

    /// Scripted outcomes per model class; records every call.
    #[derive(Default)]
    struct ScriptedBuilder {
        /// Box side per component count; missing counts fail to build
        boxes: HashMap<usize, usize>,
        /// Component count whose SED is NaN
        nan_sed: Option<usize>,
        /// Place models against the top border
        at_edge: bool,
        /// Only the first call at the edge, rebuilt models move inside
        edge_once: bool,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedBuilder {
        fn component(&self, count: usize, index: usize) -> Result<Component, BuildError> {
            let size = *self.boxes.get(&count).ok_or(BuildError::Unresolved { pixels: 0 })?;
            let sed = if self.nan_sed == Some(count) {
                array![f64::NAN, 1.0]
            } else {
                array![1.0, 0.5]
            };
            let calls = self.calls.lock().unwrap().len();
            let edge = self.at_edge && !(self.edge_once && calls > 1);
            let y0 = if edge { 0 } else { 20 };
            let bbox = BBox::new(y0 + index as isize, 20, size, size);
            Ok(Component::new(sed, Array2::ones((size, size)), bbox))
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SourceBuilder for ScriptedBuilder {
        fn point_source(
            &self,
            _frame: &Frame,
            _center: (f64, f64),
            _observation: &Observation,
        ) -> Result<Component, BuildError> {
            self.calls.lock().unwrap().push(Call::Point);
            self.component(0, 0)
        }

        fn extended_source(
            &self,
            _frame: &Frame,
            _center: (f64, f64),
            _observation: &Observation,
            params: &ExtendedParams,
        ) -> Result<Component, BuildError> {
            self.calls.lock().unwrap().push(Call::Single(params.shifting));
            self.component(1, 0)
        }

        fn multi_component_source(
            &self,
            _frame: &Frame,
            _center: (f64, f64),
            _observation: &Observation,
            params: &ExtendedParams,
            components: usize,
        ) -> Result<Vec<Component>, BuildError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Multi(components, params.shifting));
            (0..components).map(|i| self.component(components, i)).collect()
        }
    }

    fn scene() -> (Frame, Observation) {
        let _ = env_logger::builder().is_test(true).try_init();
        let stack = ImageStack::from_cube("test", Array3::zeros((2, 64, 64))).unwrap();
        let frame = Frame::new(stack.channels().to_vec(), (64, 64), None, None);
        (frame, Observation::unweighted(&stack))
    }

    fn builder(boxes: &[(usize, usize)]) -> ScriptedBuilder {
        ScriptedBuilder {
            boxes: boxes.iter().copied().collect(),
            ..ScriptedBuilder::default()
        }
    }

    #[test]
    fn test_falls_back_to_point_source() {
        let (frame, obs) = scene();
        let builder = builder(&[(0, 5)]);
        let config = InitConfig {
            max_components: 3,
            ..InitConfig::default()
        };

        let model = init_source(&frame, (30.0, 30.0), &obs, &builder, &config)
            .unwrap()
            .unwrap();

        assert!(model.is_point());
        assert!(model.shifting);
        assert!(!model.is_edge);
        assert_eq!(
            builder.calls(),
            vec![
                Call::Multi(3, false),
                Call::Multi(2, false),
                Call::Single(false),
                Call::Point
            ]
        );
    }

    #[test]
    fn test_invalid_sed_triggers_fallback() {
        let (frame, obs) = scene();
        let mut builder = builder(&[(2, 30), (1, 30)]);
        builder.nan_sed = Some(2);
        let config = InitConfig {
            max_components: 2,
            ..InitConfig::default()
        };

        let model = init_source(&frame, (30.0, 30.0), &obs, &builder, &config)
            .unwrap()
            .unwrap();
        assert_eq!(model.component_count(), 1);
        assert_eq!(builder.calls(), vec![Call::Multi(2, false), Call::Single(false)]);
    }

    #[test]
    fn test_accepted_multi_model_kept_after_downgrade() {
        let (frame, obs) = scene();
        let builder = builder(&[(2, 6), (1, 6), (0, 3)]);
        let config = InitConfig {
            max_components: 2,
            ..InitConfig::default()
        };

        let model = init_source(&frame, (30.0, 30.0), &obs, &builder, &config)
            .unwrap()
            .unwrap();
        assert_eq!(model.component_count(), 2);
        assert_eq!(builder.calls(), vec![Call::Multi(2, false)]);
    }

    #[test]
    fn test_never_exceeds_max_components() {
        let (frame, obs) = scene();
        let builder = builder(&[(3, 30), (2, 30), (1, 30), (0, 3)]);
        let config = InitConfig::default();

        let model = init_source(&frame, (30.0, 30.0), &obs, &builder, &config)
            .unwrap()
            .unwrap();
        assert_eq!(model.component_count(), 1);
        assert_eq!(builder.calls(), vec![Call::Single(false)]);
    }

    #[test]
    fn test_total_failure_is_none() {
        let (frame, obs) = scene();
        let builder = builder(&[]);
        let result = init_source(&frame, (30.0, 30.0), &obs, &builder, &InitConfig::default());
        assert_eq!(result.unwrap(), None);
        assert_eq!(builder.calls(), vec![Call::Single(false), Call::Point]);
    }

    #[test]
    fn test_without_fallback_failure_is_error() {
        let (frame, obs) = scene();
        let builder = builder(&[(0, 3)]);
        let config = InitConfig {
            max_components: 2,
            fallback: false,
            ..InitConfig::default()
        };

        let err = init_source(&frame, (30.0, 30.0), &obs, &builder, &config).unwrap_err();
        assert!(matches!(err, InitError::Construction { components: 2, .. }));
        assert_eq!(builder.calls(), vec![Call::Multi(2, false)]);
    }

    #[test]
    fn test_zero_edge_distance_fails_before_building() {
        let (frame, obs) = scene();
        let builder = builder(&[(1, 30)]);
        let config = InitConfig {
            edge_distance: Some(0),
            ..InitConfig::default()
        };
        assert!(matches!(
            init_source(&frame, (30.0, 30.0), &obs, &builder, &config),
            Err(InitError::InvalidConfig(_))
        ));
        assert!(builder.calls().is_empty());
    }

    #[test]
    fn test_edge_source_rebuilt_once_with_shifting() {
        let (frame, obs) = scene();
        let mut builder = builder(&[(1, 30)]);
        builder.at_edge = true;

        let model = init_source(&frame, (2.0, 30.0), &obs, &builder, &InitConfig::default())
            .unwrap()
            .unwrap();

        assert!(model.is_edge);
        assert!(model.shifting);
        assert_eq!(builder.calls(), vec![Call::Single(false), Call::Single(true)]);
    }

    #[test]
    fn test_rebuilt_model_records_final_edge_test() {
        let (frame, obs) = scene();
        let mut builder = builder(&[(1, 30)]);
        builder.at_edge = true;
        builder.edge_once = true;

        let model = init_source(&frame, (2.0, 30.0), &obs, &builder, &InitConfig::default())
            .unwrap()
            .unwrap();

        assert!(!model.is_edge);
        assert_eq!(builder.calls().len(), 2);
    }

    #[test]
    fn test_edge_test_disabled_or_already_shifting() {
        let (frame, obs) = scene();
        let mut no_edge = builder(&[(1, 30)]);
        no_edge.at_edge = true;
        let config = InitConfig {
            edge_distance: None,
            ..InitConfig::default()
        };
        let model = init_source(&frame, (2.0, 30.0), &obs, &no_edge, &config)
            .unwrap()
            .unwrap();
        assert!(!model.is_edge);
        assert_eq!(no_edge.calls().len(), 1);

        let mut shifting = builder(&[(1, 30)]);
        shifting.at_edge = true;
        let config = InitConfig {
            shifting: true,
            ..InitConfig::default()
        };
        let model = init_source(&frame, (2.0, 30.0), &obs, &shifting, &config)
            .unwrap()
            .unwrap();
        assert!(model.is_edge);
        assert_eq!(shifting.calls(), vec![Call::Single(true)]);
    }

    #[test]
    fn test_batch_skips_and_matches_parallel() {
        let (frame, obs) = scene();
        let centers = [(10.0, 10.0), (20.0, 20.0), (30.0, 30.0)];
        let builder = builder(&[]);
        let (sources, skipped) =
            init_all_sources(&frame, &centers, &obs, &builder, &InitConfig::default()).unwrap();
        assert!(sources.is_empty());
        assert_eq!(skipped, vec![0, 1, 2]);

        let mut cube = Array3::<f64>::zeros((1, 32, 32));
        cube[[0, 5, 5]] = 50.0;
        test_helpers::synthetic::add_gaussian_source(&mut cube, 20.0, 20.0, &[40.0], 3.0);
        let stack = ImageStack::from_cube("scene", cube).unwrap();
        let obs = Observation::unweighted(&stack);
        let frame = Frame::new(stack.channels().to_vec(), (32, 32), None, None);
        let centers = [(5.0, 5.0), (-4.0, 3.0), (20.0, 20.0)];
        let config = InitConfig::default();

        let sequential =
            init_all_sources(&frame, &centers, &obs, &CoaddBuilder::default(), &config).unwrap();
        let parallel =
            par_init_all_sources(&frame, &centers, &obs, &CoaddBuilder::default(), &config)
                .unwrap();

        assert_eq!(sequential, parallel);
        let (sources, skipped) = sequential;
        assert_eq!(skipped, vec![1]);
        assert_eq!(sources.len() + skipped.len(), centers.len());
        assert!(sources[0].is_point());
        assert_eq!(sources[1].component_count(), 1);
    }

    #[test]
    fn test_single_pixel_exercises_full_chain() {
        let mut cube = Array3::<f64>::zeros((2, 21, 21));
        cube[[0, 10, 10]] = 100.0;
        cube[[1, 10, 10]] = 60.0;
        let stack = ImageStack::from_cube("pixel", cube).unwrap();
        let obs = Observation::unweighted(&stack);
        let psf = Some(test_helpers::synthetic::gaussian_psf(5, 1.0));
        let frame = Frame::new(stack.channels().to_vec(), (21, 21), psf, None);
        let config = InitConfig {
            max_components: 2,
            ..InitConfig::default()
        };

        let model = init_source(&frame, (10.0, 10.0), &obs, &CoaddBuilder::default(), &config)
            .unwrap()
            .unwrap();

        assert!(model.is_point());
        assert_eq!(model.components()[0].sed, array![100.0, 60.0]);
        assert!(!model.is_edge);
        assert!(model.defect().is_none());
    }
}
