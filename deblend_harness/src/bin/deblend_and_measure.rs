//! Deblend every blend of a test set and record the measurements
//!
//! Records are written to `<data>/<set_id>/<branch>.json` and the branch is
//! added to the registry when `--save` is given.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use deblend::{CatalogConfig, InitConfig};
use deblend_harness::{
    deblend_and_measure_with, HarnessConfig, InitDeblender, LocalBlendStore, MeasureOptions,
};
use indicatif::{ProgressBar, ProgressStyle};

/// Command line arguments for the regression run
#[derive(Parser, Debug)]
#[command(
    name = "Deblend and Measure",
    about = "Reruns deblending over a stored test set and records per-source measurements",
    long_about = None
)]
struct Args {
    /// Test set to process
    #[arg(long)]
    set_id: String,

    /// Branch name the records are filed under
    #[arg(long)]
    branch: Option<String>,

    /// Replace records of a branch that was already processed
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Write the record table and register the branch
    #[arg(long, default_value_t = false)]
    save: bool,

    /// Harness configuration (JSON); paths default to the layout under --root
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root of the default layout when no config file is given
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Initialization settings (JSON)
    #[arg(long)]
    init_config: Option<PathBuf>,

    /// Detection level in units of the background noise
    #[arg(long, default_value_t = 3.0)]
    level: f64,

    /// Detect on the raw coadd instead of the wavelet-filtered image
    #[arg(long, default_value_t = false)]
    no_wavelet: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("loading harness config {}", path.display()))?,
        None => HarnessConfig::from_root(&args.root),
    };

    let init = match &args.init_config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<InitConfig>(&json)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => InitConfig::default(),
    };
    init.validate()?;

    let mut deblender = InitDeblender::new(&config);
    deblender.init = init;
    deblender.detection = CatalogConfig {
        level: args.level,
        use_wavelet: !args.no_wavelet,
        ..CatalogConfig::default()
    };

    let store = LocalBlendStore::new(&config.blends);
    let options = MeasureOptions {
        set_id: args.set_id.clone(),
        branch: args.branch.clone(),
        overwrite: args.overwrite,
        save_records: args.save,
    };

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("##-"),
    );

    let table = deblend_and_measure_with(
        &config,
        &store,
        &options,
        &mut deblender,
        |index, total, blend_id| {
            progress.set_length(total as u64);
            progress.set_position(index as u64);
            progress.set_message(blend_id.to_string());
        },
    )
    .with_context(|| format!("processing set {}", args.set_id))?;
    progress.finish_with_message("done");

    println!(
        "Measured {} sources with columns: {}",
        table.len(),
        table.columns().join(", ")
    );
    Ok(())
}
