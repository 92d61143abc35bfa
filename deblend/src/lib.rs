//! Detection and source initialization for multi-band astronomical deblending.
//!
//! - [`image_proc`]: image stacks, WCS, starlet transform, resampling and
//!   detection catalogs
//! - [`initialization`]: source models and the component-fallback initializer
//! - [`runner`]: detection → initialization → fitting for one scene

pub mod algo;
pub mod image_proc;
pub mod initialization;
pub mod runner;

pub use image_proc::detection::{
    build_catalog, build_catalog_with, CatalogConfig, CatalogEntry, DetectionError,
    NoiseEstimate, PeakDetector, SourceCatalog, ThresholdDetector,
};
pub use image_proc::{BBox, ImageStack, StackError, Starlet, Wcs};
pub use initialization::{
    init_all_sources, init_source, par_init_all_sources, BuildError, CoaddBuilder, Frame,
    InitConfig, InitError, Observation, SourceBuilder, SourceKind, SourceModel,
};
pub use runner::{BlendFitter, FitError, FitSummary, Runner, RunnerError, SourceRequest};
