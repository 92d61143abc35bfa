//! Source model initialization.
//!
//! Each detected center is turned into a point, extended or multi-component
//! model through the [`SourceBuilder`] seam, falling back to simpler model
//! classes when construction fails.

pub mod builder;
pub mod coadd;
pub mod config;
pub mod edge;
pub mod frame;
pub mod model;
pub mod source;

use thiserror::Error;

pub use builder::{BuildError, ExtendedParams, SourceBuilder};
pub use coadd::{Coadd, CoaddBuilder};
pub use config::InitConfig;
pub use edge::has_edge_flux;
pub use frame::{Frame, Observation};
pub use model::{Component, SourceKind, SourceModel};
pub use source::{init_all_sources, init_source, par_init_all_sources};

/// Errors raised by source initialization
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InitError {
    #[error("invalid initialization config: {0}")]
    InvalidConfig(String),
    #[error("could not build a {components}-component model at {center:?}")]
    Construction {
        center: (f64, f64),
        components: usize,
        source: BuildError,
    },
}
