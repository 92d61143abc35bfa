//! Test helpers for the deblending workspace
//!
//! Synthetic scenes (seeded noise, Gaussian sources, PSFs) and lookup of
//! files checked into the workspace.

pub mod synthetic;

use once_cell::sync::Lazy;
use std::env;
use std::path::{Path, PathBuf};

/// Error type for test helper operations
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("Failed to find workspace root: {0}")]
    WorkspaceRootNotFound(String),
}

/// Returns the workspace root directory.
///
/// Walks up from the current directory until a Cargo.toml declaring
/// `[workspace]` is found.
pub fn find_workspace_root() -> Result<PathBuf, TestHelperError> {
    let mut current_dir = env::current_dir().map_err(|e| {
        TestHelperError::WorkspaceRootNotFound(format!("Failed to get current directory: {e}"))
    })?;

    loop {
        let cargo_toml = current_dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = std::fs::read_to_string(&cargo_toml).map_err(|e| {
                TestHelperError::WorkspaceRootNotFound(format!("Failed to read Cargo.toml: {e}"))
            })?;
            if content.contains("[workspace]") {
                return Ok(current_dir);
            }
        }

        if !current_dir.pop() {
            break;
        }
    }

    Err(TestHelperError::WorkspaceRootNotFound(
        "no Cargo.toml with [workspace] above the current directory".to_string(),
    ))
}

static WORKSPACE_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_workspace_root().expect("Failed to find workspace root directory"));

/// Path of a file relative to the workspace root.
pub fn workspace_path<P: AsRef<Path>>(relative: P) -> PathBuf {
    WORKSPACE_ROOT.join(relative)
}
