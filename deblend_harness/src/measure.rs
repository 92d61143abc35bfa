//! Rerun deblending over a test set and record per-source measurements.

use deblend::{
    BlendFitter, CatalogConfig, CoaddBuilder, InitConfig, Observation, Runner, RunnerError,
    SourceModel,
};
use serde_json::Value;

use crate::branches::BranchRegistry;
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::records::{Record, RecordTable};
use crate::store::{BlendData, BlendStore};

/// Result of deblending one blend.
#[derive(Debug, Clone)]
pub struct DeblendOutput {
    /// One record per source
    pub measurements: Vec<Record>,
    /// Observation the sources were initialized against
    pub observation: Observation,
    pub sources: Vec<SourceModel>,
}

/// Deblends a stored blend into measured sources.
pub trait Deblender {
    fn deblend(&mut self, blend: &BlendData) -> Result<DeblendOutput, HarnessError>;
}

/// Detection followed by fallback initialization and an optional fit.
pub struct InitDeblender {
    pub detection: CatalogConfig,
    pub init: InitConfig,
    pub builder: CoaddBuilder,
    pub max_iter: usize,
    pub e_rel: f64,
    fitter: Option<Box<dyn BlendFitter>>,
}

impl InitDeblender {
    /// Deblender using the harness fitting settings and no fitter.
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            detection: CatalogConfig::default(),
            init: InitConfig::default(),
            builder: CoaddBuilder::default(),
            max_iter: config.max_iter,
            e_rel: config.e_rel,
            fitter: None,
        }
    }

    pub fn with_fitter(mut self, fitter: Box<dyn BlendFitter>) -> Self {
        self.fitter = Some(fitter);
        self
    }
}

impl Deblender for InitDeblender {
    fn deblend(&mut self, blend: &BlendData) -> Result<DeblendOutput, HarnessError> {
        let wrap = |source: RunnerError| HarnessError::Deblend {
            blend_id: blend.blend_id.clone(),
            source,
        };

        let mut runner = Runner::with_detection(
            blend.stacks.clone(),
            blend.model_psf.clone(),
            blend.sky_coords.clone(),
            &self.detection,
        )
        .map_err(wrap)?;

        let center_count = runner.centers().len();
        let skipped = runner
            .initialize_with_fallback(&self.builder, &self.init)
            .map_err(wrap)?
            .to_vec();
        let source_ids: Vec<usize> = (0..center_count).filter(|i| !skipped.contains(i)).collect();

        let (iterations, log_likelihood) = match self.fitter.as_mut() {
            Some(fitter) if !runner.sources().is_empty() => {
                let summary = runner
                    .run(&mut **fitter, self.max_iter, self.e_rel)
                    .map_err(wrap)?;
                (summary.iterations(), summary.log_likelihood())
            }
            _ => (0, None),
        };

        let channels = runner.frame().channels().to_vec();
        let wcs = runner.frame().wcs().cloned();
        let measurements = runner
            .sources()
            .iter()
            .zip(&source_ids)
            .map(|(source, &id)| {
                let mut record = Record::new()
                    .with("blend_id", blend.blend_id.as_str())
                    .with("source_id", id)
                    .with("kind", source.kind_name())
                    .with("components", source.component_count())
                    .with("is_edge", source.is_edge)
                    .with("row", source.center.0)
                    .with("col", source.center.1);

                let (ra, dec) = match &wcs {
                    Some(wcs) => {
                        let (ra, dec) = wcs.pixel_to_sky(source.center.1, source.center.0);
                        (Value::from(ra), Value::from(dec))
                    }
                    None => (Value::Null, Value::Null),
                };
                record.insert("ra", ra);
                record.insert("dec", dec);

                for (channel, flux) in channels.iter().zip(source.flux().iter()) {
                    record.insert(format!("flux_{channel}"), *flux);
                }
                record.insert("iterations", iterations);
                record.insert("log_likelihood", log_likelihood);
                record
            })
            .collect();

        Ok(DeblendOutput {
            measurements,
            observation: runner.reference_observation().clone(),
            sources: runner.sources().to_vec(),
        })
    }
}

/// Which set to run and whether to persist the result.
#[derive(Debug, Clone, Default)]
pub struct MeasureOptions {
    pub set_id: String,
    /// Branch the records are filed under; required when saving
    pub branch: Option<String>,
    pub overwrite: bool,
    pub save_records: bool,
}

/// Deblend every blend of a set and aggregate the measurement records.
pub fn deblend_and_measure(
    config: &HarnessConfig,
    store: &dyn BlendStore,
    options: &MeasureOptions,
    deblender: &mut dyn Deblender,
) -> Result<RecordTable, HarnessError> {
    deblend_and_measure_with(config, store, options, deblender, |_, _, _| {})
}

/// [`deblend_and_measure`] calling `on_blend(index, total, blend_id)` before each blend.
pub fn deblend_and_measure_with<F>(
    config: &HarnessConfig,
    store: &dyn BlendStore,
    options: &MeasureOptions,
    deblender: &mut dyn Deblender,
    mut on_blend: F,
) -> Result<RecordTable, HarnessError>
where
    F: FnMut(usize, usize, &str),
{
    let registry = BranchRegistry::new(&config.branch_file);
    let branch = match (&options.branch, options.save_records) {
        (Some(branch), true) => {
            registry.check_data_existence(&options.set_id, branch, options.overwrite)?;
            Some(branch.as_str())
        }
        (None, true) => return Err(HarnessError::MissingBranch),
        (_, false) => None,
    };

    let blend_ids = store.blend_ids(&options.set_id)?;
    let total = blend_ids.len();
    let mut all_measurements = Vec::new();
    for (index, blend_id) in blend_ids.iter().enumerate() {
        on_blend(index, total, blend_id);
        log::info!("blend {} of {total}: {blend_id}", index + 1);

        let blend = store.load_blend(&options.set_id, blend_id)?;
        let output = deblender.deblend(&blend)?;
        log::debug!(
            "{blend_id}: {} sources measured",
            output.measurements.len()
        );
        all_measurements.extend(output.measurements);
    }

    let table = RecordTable::from_records(&options.set_id, all_measurements)?;

    if let Some(branch) = branch {
        let path = config.records_path(&options.set_id, branch);
        table.save(&path)?;
        registry.save_branch(branch)?;
        log::info!("wrote {} records to {}", table.len(), path.display());
    }
    Ok(table)
}
