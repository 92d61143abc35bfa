//! Regression harness for the deblender.
//!
//! Stored blends are grouped into test sets. Each run deblends every blend
//! of a set, aggregates one measurement record per source and files the
//! resulting table under the code branch that produced it, so successive
//! branches can be compared.

pub mod branches;
pub mod config;
pub mod error;
pub mod measure;
pub mod records;
pub mod store;

pub use branches::BranchRegistry;
pub use config::HarnessConfig;
pub use error::HarnessError;
pub use measure::{
    deblend_and_measure, deblend_and_measure_with, DeblendOutput, Deblender, InitDeblender,
    MeasureOptions,
};
pub use records::{Record, RecordTable};
pub use store::{BlendData, BlendStore, LocalBlendStore};
