//! Detection, initialization and fitting of one scene.
//!
//! A [`Runner`] owns the image stacks of a scene. On construction it builds
//! the detection catalog, one inverse-variance weighted observation per
//! stack and the model frame; sources can then be initialized explicitly or
//! through the fallback initializer and handed to a [`BlendFitter`].

use ndarray::Array2;
use thiserror::Error;

use crate::image_proc::detection::{
    build_catalog, CatalogConfig, DetectionError, NoiseEstimate, SourceCatalog,
};
use crate::image_proc::stack::{ImageStack, StackError};
use crate::initialization::frame::finest_observation;
use crate::initialization::{
    has_edge_flux, init_all_sources, BuildError, ExtendedParams, Frame, InitConfig, InitError,
    Observation, SourceBuilder, SourceKind, SourceModel,
};

/// Detection level used on construction
pub const DEFAULT_LEVEL: f64 = 3.0;

/// Maximum fit iterations
pub const DEFAULT_MAX_ITER: usize = 200;

/// Relative convergence limit of the fit
pub const DEFAULT_E_REL: f64 = 1e-6;

/// Errors raised by the runner
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunnerError {
    #[error("runner needs at least one image stack")]
    NoStacks,
    #[error("expected {expected} stacks, got {found}")]
    StackCountMismatch { expected: usize, found: usize },
    #[error("expected one source kind per center ({expected}), got {found}")]
    KindCountMismatch { expected: usize, found: usize },
    #[error("source {index} could not be built")]
    Build {
        index: usize,
        #[source]
        source: BuildError,
    },
    #[error("no sources initialized")]
    NoSources,
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error(transparent)]
    Stack(#[from] StackError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error(transparent)]
    Fit(#[from] FitError),
}

/// Failure reported by a fitting engine.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("fit failed: {0}")]
pub struct FitError(pub String);

/// Loss history of a fit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FitSummary {
    /// Loss per iteration (negative log-likelihood)
    pub loss: Vec<f64>,
}

impl FitSummary {
    pub fn iterations(&self) -> usize {
        self.loss.len()
    }

    /// Log-likelihood after the last iteration
    pub fn log_likelihood(&self) -> Option<f64> {
        self.loss.last().map(|l| -l)
    }
}

/// Fitting engine that refines initialized source models against observations.
pub trait BlendFitter {
    fn fit(
        &mut self,
        sources: &mut [SourceModel],
        observations: &[Observation],
        frame: &Frame,
        max_iter: usize,
        e_rel: f64,
    ) -> Result<FitSummary, FitError>;
}

/// Model class requested for a source in [`Runner::initialize_sources`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRequest {
    Point,
    Extended,
}

/// Scene state from detection to fitting.
#[derive(Debug, Clone)]
pub struct Runner {
    stacks: Vec<ImageStack>,
    level: f64,
    use_wavelet: bool,
    catalog: SourceCatalog,
    noise: Vec<NoiseEstimate>,
    observations: Vec<Observation>,
    reference: usize,
    frame: Frame,
    sky_coords: Option<Vec<(f64, f64)>>,
    sources: Vec<SourceModel>,
    skipped: Vec<usize>,
}

impl Runner {
    /// Detect sources at level 3 on the wavelet-filtered image and prepare
    /// observations for `stacks`.
    ///
    /// `stacks` is one stack or a (low, high) resolution pair. Sky
    /// coordinates of the detections are derived from the catalog unless
    /// given.
    pub fn new(
        stacks: Vec<ImageStack>,
        model_psf: Option<Array2<f64>>,
        sky_coords: Option<Vec<(f64, f64)>>,
    ) -> Result<Self, RunnerError> {
        let detection = CatalogConfig {
            level: DEFAULT_LEVEL,
            use_wavelet: true,
            ..CatalogConfig::default()
        };
        Self::with_detection(stacks, model_psf, sky_coords, &detection)
    }

    /// [`Runner::new`] with explicit detection settings.
    pub fn with_detection(
        stacks: Vec<ImageStack>,
        model_psf: Option<Array2<f64>>,
        sky_coords: Option<Vec<(f64, f64)>>,
        detection: &CatalogConfig,
    ) -> Result<Self, RunnerError> {
        if stacks.is_empty() {
            return Err(RunnerError::NoStacks);
        }
        let (catalog, noise) = build_catalog(&stacks, detection.level, detection.use_wavelet)?;

        let observations = stacks
            .iter()
            .zip(&noise)
            .map(|(stack, noise)| Observation::from_stack(stack, noise))
            .collect::<Result<Vec<_>, _>>()?;
        let reference = finest_observation(&observations).ok_or(RunnerError::NoStacks)?;
        let frame =
            Frame::from_observations(&observations, model_psf).ok_or(RunnerError::NoStacks)?;

        let mut runner = Self {
            stacks,
            level: detection.level,
            use_wavelet: detection.use_wavelet,
            catalog,
            noise,
            observations,
            reference,
            frame,
            sky_coords: None,
            sources: Vec::new(),
            skipped: Vec::new(),
        };
        runner.sky_coords = sky_coords.or_else(|| runner.catalog_sky_coords());
        log::info!(
            "runner: {} detections on a {:?} frame with {} channels",
            runner.catalog.len(),
            runner.frame.shape(),
            runner.frame.num_channels()
        );
        Ok(runner)
    }

    /// Rebuild the catalog and noise estimates.
    pub fn run_detection(&mut self, level: f64, use_wavelet: bool) -> Result<(), RunnerError> {
        let (catalog, noise) = build_catalog(&self.stacks, level, use_wavelet)?;
        self.level = level;
        self.use_wavelet = use_wavelet;
        self.catalog = catalog;
        self.noise = noise;
        Ok(())
    }

    /// Replace the pixel data of every stack and rerun detection.
    ///
    /// Observation weights are kept; sky coordinates follow the new catalog.
    /// On error the runner is left untouched.
    pub fn set_data(&mut self, stacks: Vec<ImageStack>) -> Result<(), RunnerError> {
        if stacks.len() != self.stacks.len() {
            return Err(RunnerError::StackCountMismatch {
                expected: self.stacks.len(),
                found: stacks.len(),
            });
        }
        for (observation, stack) in self.observations.iter().zip(&stacks) {
            let expected = observation.images().dim();
            let found = stack.images().dim();
            if expected != found {
                return Err(StackError::ShapeMismatch { expected, found }.into());
            }
        }
        let (catalog, noise) = build_catalog(&stacks, self.level, self.use_wavelet)?;

        for (observation, stack) in self.observations.iter_mut().zip(&stacks) {
            observation.set_images(stack.images().to_owned())?;
        }
        self.stacks = stacks;
        self.catalog = catalog;
        self.noise = noise;
        self.sky_coords = self.catalog_sky_coords();
        Ok(())
    }

    /// Build each source with the requested model class, no fallback.
    pub fn initialize_sources<B>(
        &mut self,
        kinds: &[SourceRequest],
        builder: &B,
    ) -> Result<(), RunnerError>
    where
        B: SourceBuilder + ?Sized,
    {
        let centers = self.centers();
        if kinds.len() != centers.len() {
            return Err(RunnerError::KindCountMismatch {
                expected: centers.len(),
                found: kinds.len(),
            });
        }

        let defaults = InitConfig::default();
        let params = ExtendedParams {
            symmetric: defaults.symmetric,
            monotonic: defaults.monotonic,
            thresh: defaults.thresh,
            shifting: false,
            min_gradient: defaults.min_gradient,
        };
        let observation = &self.observations[self.reference];

        let mut sources = Vec::with_capacity(centers.len());
        for (index, (&center, kind)) in centers.iter().zip(kinds).enumerate() {
            let built = match kind {
                SourceRequest::Point => builder
                    .point_source(&self.frame, center, observation)
                    .map(|c| SourceModel::new(center, SourceKind::Point(c), true)),
                SourceRequest::Extended => builder
                    .extended_source(&self.frame, center, observation, &params)
                    .map(|c| SourceModel::new(center, SourceKind::Extended(c), false)),
            };
            let mut model = built.map_err(|source| RunnerError::Build { index, source })?;
            model.is_edge = has_edge_flux(&model, &self.frame, defaults.edge_distance)?;
            sources.push(model);
        }

        self.sources = sources;
        self.skipped.clear();
        Ok(())
    }

    /// Initialize all centers with component fallback; returns the skipped indices.
    pub fn initialize_with_fallback<B>(
        &mut self,
        builder: &B,
        config: &InitConfig,
    ) -> Result<&[usize], RunnerError>
    where
        B: SourceBuilder + ?Sized,
    {
        let centers = self.centers();
        let (sources, skipped) = init_all_sources(
            &self.frame,
            &centers,
            &self.observations[self.reference],
            builder,
            config,
        )?;
        self.sources = sources;
        self.skipped = skipped;
        Ok(&self.skipped)
    }

    /// Fit the initialized sources.
    pub fn run(
        &mut self,
        fitter: &mut dyn BlendFitter,
        max_iter: usize,
        e_rel: f64,
    ) -> Result<FitSummary, RunnerError> {
        if self.sources.is_empty() {
            return Err(RunnerError::NoSources);
        }
        let summary = fitter.fit(
            &mut self.sources,
            &self.observations,
            &self.frame,
            max_iter,
            e_rel,
        )?;
        log::info!(
            "fit ran for {} iterations to logL = {:?}",
            summary.iterations(),
            summary.log_likelihood()
        );
        Ok(summary)
    }

    /// Source positions (row, col) on the frame grid.
    ///
    /// Taken from the sky coordinates when the frame has a WCS, otherwise
    /// from the catalog.
    pub fn centers(&self) -> Vec<(f64, f64)> {
        match (&self.sky_coords, self.frame.wcs()) {
            (Some(sky), Some(wcs)) => sky
                .iter()
                .map(|&(ra, dec)| {
                    let (x, y) = wcs.sky_to_pixel(ra, dec);
                    (y, x)
                })
                .collect(),
            _ => self.catalog.pixel_coords(),
        }
    }

    fn catalog_sky_coords(&self) -> Option<Vec<(f64, f64)>> {
        let wcs = self.observations[self.reference].wcs()?;
        Some(
            self.catalog
                .pixel_coords()
                .into_iter()
                .map(|(row, col)| wcs.pixel_to_sky(col, row))
                .collect(),
        )
    }

    pub fn stacks(&self) -> &[ImageStack] {
        &self.stacks
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    pub fn noise(&self) -> &[NoiseEstimate] {
        &self.noise
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Observation sharing the frame grid
    pub fn reference_observation(&self) -> &Observation {
        &self.observations[self.reference]
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn sky_coords(&self) -> Option<&[(f64, f64)]> {
        self.sky_coords.as_deref()
    }

    pub fn sources(&self) -> &[SourceModel] {
        &self.sources
    }

    pub fn skipped(&self) -> &[usize] {
        &self.skipped
    }
}
