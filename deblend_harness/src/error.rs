use std::path::PathBuf;

use deblend::RunnerError;
use thiserror::Error;

/// Errors produced while rerunning and recording a test set.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Results for this branch were recorded before and overwriting is off.
    #[error(
        "branch {branch} has already been analyzed for set {set_id}, set `overwrite` to replace it"
    )]
    BranchExists { branch: String, set_id: String },

    #[error("saving records requires a branch name")]
    MissingBranch,

    #[error("set {0} produced no measurement records")]
    NoRecords(String),

    #[error("record {index} has columns {found:?}, expected {expected:?}")]
    ColumnMismatch {
        index: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("blend {blend_id}: {source}")]
    Deblend {
        blend_id: String,
        #[source]
        source: RunnerError,
    },
}

impl HarnessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
