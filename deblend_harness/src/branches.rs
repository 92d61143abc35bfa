//! Registry of code branches whose measurements have been recorded.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct BranchFile {
    branches: Vec<String>,
}

/// JSON file `{"branches": [...]}` listing branches in processing order.
#[derive(Debug, Clone)]
pub struct BranchRegistry {
    path: PathBuf,
}

impl BranchRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Processed branches; a missing registry file means none yet.
    pub fn branches(&self) -> Result<Vec<String>, HarnessError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let json =
            std::fs::read_to_string(&self.path).map_err(|e| HarnessError::io(&self.path, e))?;
        let file: BranchFile =
            serde_json::from_str(&json).map_err(|e| HarnessError::json(&self.path, e))?;
        Ok(file.branches)
    }

    /// Append `branch` unless it is already registered.
    pub fn save_branch(&self, branch: &str) -> Result<(), HarnessError> {
        let mut branches = self.branches()?;
        if branches.iter().any(|b| b == branch) {
            return Ok(());
        }
        branches.push(branch.to_string());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| HarnessError::io(parent, e))?;
        }
        let json = serde_json::to_string(&BranchFile { branches })
            .map_err(|e| HarnessError::json(&self.path, e))?;
        std::fs::write(&self.path, json).map_err(|e| HarnessError::io(&self.path, e))
    }

    /// Fail if `branch` was processed before and `overwrite` is off.
    pub fn check_data_existence(
        &self,
        set_id: &str,
        branch: &str,
        overwrite: bool,
    ) -> Result<(), HarnessError> {
        if !overwrite && self.branches()?.iter().any(|b| b == branch) {
            return Err(HarnessError::BranchExists {
                branch: branch.to_string(),
                set_id: set_id.to_string(),
            });
        }
        Ok(())
    }
}
