//! Harness locations and fitting settings.
//!
//! All paths are explicit; nothing is derived from the location of the
//! binary. [`HarnessConfig::from_root`] lays out the conventional tree:
//!
//! ```text
//! <root>/branches.json
//! <root>/data/<set_id>/<branch>.json
//! <root>/data/blends/<set_id>/<blend_id>.json
//! ```

use std::path::{Path, PathBuf};

use deblend::runner::{DEFAULT_E_REL, DEFAULT_MAX_ITER};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub root: PathBuf,
    /// Directory holding one subdirectory of records per set
    pub data: PathBuf,
    /// Directory holding one subdirectory of blends per set
    pub blends: PathBuf,
    /// Registry of processed branches
    pub branch_file: PathBuf,
    pub max_iter: usize,
    /// Relative convergence limit handed to the fitter
    pub e_rel: f64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::from_root(".")
    }
}

impl HarnessConfig {
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let data = root.join("data");
        Self {
            blends: data.join("blends"),
            branch_file: root.join("branches.json"),
            data,
            root,
            max_iter: DEFAULT_MAX_ITER,
            e_rel: DEFAULT_E_REL,
        }
    }

    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let json = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        serde_json::from_str(&json).map_err(|e| HarnessError::json(path, e))
    }

    pub fn save(&self, path: &Path) -> Result<(), HarnessError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| HarnessError::json(path, e))?;
        std::fs::write(path, json).map_err(|e| HarnessError::io(path, e))
    }

    /// Directory of stored blends for one set.
    pub fn blend_dir(&self, set_id: &str) -> PathBuf {
        self.blends.join(set_id)
    }

    /// File the records of `branch` on `set_id` are written to.
    pub fn records_path(&self, set_id: &str, branch: &str) -> PathBuf {
        self.data.join(set_id).join(format!("{branch}.json"))
    }
}
