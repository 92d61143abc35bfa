//! End-to-end runs of the regression harness on synthetic test sets

use std::path::PathBuf;

use deblend::{
    BlendFitter, CatalogConfig, FitError, FitSummary, Frame, ImageStack, Observation,
    SourceModel,
};
use deblend_harness::{
    deblend_and_measure, deblend_and_measure_with, BlendData, BranchRegistry, DeblendOutput,
    Deblender, HarnessConfig, HarnessError, InitDeblender, LocalBlendStore, MeasureOptions,
    Record, RecordTable,
};
use serde_json::json;
use test_helpers::synthetic::{add_gaussian_source, noise_cube};
use test_helpers::workspace_path;

fn two_source_stack(seed: u64) -> ImageStack {
    let mut cube = noise_cube(2, (48, 48), 0.0, 0.5, seed);
    add_gaussian_source(&mut cube, 14.0, 14.0, &[60.0, 30.0], 2.0);
    add_gaussian_source(&mut cube, 32.0, 30.0, &[20.0, 40.0], 2.0);
    ImageStack::from_cube("scene", cube).unwrap()
}

/// Harness rooted in a temporary directory with set "1" holding two blends.
fn setup() -> (tempfile::TempDir, HarnessConfig, LocalBlendStore) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let config = HarnessConfig::from_root(dir.path());
    let store = LocalBlendStore::new(&config.blends);
    for (id, seed) in [("blend-b", 4), ("blend-a", 3)] {
        let blend = BlendData {
            blend_id: id.to_string(),
            stacks: vec![two_source_stack(seed)],
            model_psf: None,
            sky_coords: None,
        };
        store.save_blend("1", &blend).unwrap();
    }
    (dir, config, store)
}

fn strict_deblender(config: &HarnessConfig) -> InitDeblender {
    let mut deblender = InitDeblender::new(config);
    deblender.detection = CatalogConfig {
        level: 10.0,
        use_wavelet: false,
        ..CatalogConfig::default()
    };
    deblender
}

fn save_options(branch: &str, overwrite: bool) -> MeasureOptions {
    MeasureOptions {
        set_id: "1".into(),
        branch: Some(branch.into()),
        overwrite,
        save_records: true,
    }
}

#[test]
fn test_records_saved_and_branch_registered() {
    let (_dir, config, store) = setup();
    let mut deblender = strict_deblender(&config);

    let mut visited = Vec::new();
    let table = deblend_and_measure_with(
        &config,
        &store,
        &save_options("main", false),
        &mut deblender,
        |index, total, id| visited.push((index, total, id.to_string())),
    )
    .unwrap();

    assert_eq!(
        visited,
        vec![(0, 2, "blend-a".to_string()), (1, 2, "blend-b".to_string())]
    );
    assert!(table.len() >= 3);
    for column in ["blend_id", "source_id", "kind", "is_edge", "flux_b0", "flux_b1"] {
        assert!(table.columns().iter().any(|c| c == column), "{column}");
    }
    assert_eq!(table.column("blend_id").unwrap()[0], &json!("blend-a"));
    assert_eq!(table.column("ra").unwrap()[0], &json!(null));

    let saved = RecordTable::load(&config.records_path("1", "main")).unwrap();
    assert_eq!(saved, table);
    let registry = BranchRegistry::new(&config.branch_file);
    assert_eq!(registry.branches().unwrap(), vec!["main"]);
}

#[test]
fn test_processed_branch_requires_overwrite() {
    let (_dir, config, store) = setup();
    let mut deblender = strict_deblender(&config);

    deblend_and_measure(&config, &store, &save_options("main", false), &mut deblender).unwrap();
    let again = deblend_and_measure(&config, &store, &save_options("main", false), &mut deblender);
    assert!(matches!(again, Err(HarnessError::BranchExists { .. })));

    deblend_and_measure(&config, &store, &save_options("main", true), &mut deblender).unwrap();
    let registry = BranchRegistry::new(&config.branch_file);
    assert_eq!(registry.branches().unwrap(), vec!["main"]);
}

#[test]
fn test_unsaved_run_writes_nothing() {
    let (_dir, config, store) = setup();
    let mut deblender = strict_deblender(&config);
    let options = MeasureOptions {
        set_id: "1".into(),
        ..MeasureOptions::default()
    };

    let table = deblend_and_measure(&config, &store, &options, &mut deblender).unwrap();
    assert!(!table.is_empty());
    assert!(!config.branch_file.exists());
    assert!(!config.data.join("1").exists());

    let missing_branch = MeasureOptions {
        save_records: true,
        ..options
    };
    assert!(matches!(
        deblend_and_measure(&config, &store, &missing_branch, &mut deblender),
        Err(HarnessError::MissingBranch)
    ));
}

struct FixedLossFitter;

impl BlendFitter for FixedLossFitter {
    fn fit(
        &mut self,
        _sources: &mut [SourceModel],
        _observations: &[Observation],
        _frame: &Frame,
        max_iter: usize,
        _e_rel: f64,
    ) -> Result<FitSummary, FitError> {
        Ok(FitSummary {
            loss: vec![4.0; max_iter.min(3)],
        })
    }
}

#[test]
fn test_fit_results_recorded() {
    let (_dir, config, store) = setup();
    let mut deblender = strict_deblender(&config).with_fitter(Box::new(FixedLossFitter));
    let options = MeasureOptions {
        set_id: "1".into(),
        ..MeasureOptions::default()
    };

    let table = deblend_and_measure(&config, &store, &options, &mut deblender).unwrap();
    assert!(table
        .column("iterations")
        .unwrap()
        .iter()
        .all(|v| **v == json!(3)));
    assert!(table
        .column("log_likelihood")
        .unwrap()
        .iter()
        .all(|v| **v == json!(-4.0)));
}

/// Emits one record per blend, with an extra column for blend-b.
struct InconsistentDeblender;

impl Deblender for InconsistentDeblender {
    fn deblend(&mut self, blend: &BlendData) -> Result<DeblendOutput, HarnessError> {
        let mut record = Record::new().with("blend_id", blend.blend_id.as_str());
        if blend.blend_id == "blend-b" {
            record.insert("extra", 1.0);
        }
        Ok(DeblendOutput {
            measurements: vec![record],
            observation: Observation::unweighted(&blend.stacks[0]),
            sources: Vec::new(),
        })
    }
}

#[test]
fn test_custom_deblender_column_mismatch() {
    let (_dir, config, store) = setup();
    let result = deblend_and_measure(
        &config,
        &store,
        &save_options("custom", false),
        &mut InconsistentDeblender,
    );
    assert!(matches!(
        result,
        Err(HarnessError::ColumnMismatch { index: 1, .. })
    ));
    assert!(!config.records_path("1", "custom").exists());
}

#[test]
fn test_unknown_set_is_an_io_error() {
    let (_dir, config, store) = setup();
    let mut deblender = strict_deblender(&config);
    let options = MeasureOptions {
        set_id: "9".into(),
        ..MeasureOptions::default()
    };
    assert!(matches!(
        deblend_and_measure(&config, &store, &options, &mut deblender),
        Err(HarnessError::Io { .. })
    ));
}

#[test]
fn test_checked_in_config_loads() {
    let config = HarnessConfig::load(&workspace_path("deblend_harness/fixtures/harness.json"))
        .unwrap();
    assert_eq!(config.max_iter, 300);
    assert_eq!(config.e_rel, 1e-5);
    assert_eq!(
        config.records_path("2", "main"),
        PathBuf::from("regression/data/2/main.json")
    );
}
