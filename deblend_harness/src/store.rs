//! Stored test blends.

use std::path::{Path, PathBuf};

use deblend::ImageStack;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// One stored scene: its stacks plus optional model PSF and source positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendData {
    pub blend_id: String,
    /// One stack, or a (low, high) resolution pair
    pub stacks: Vec<ImageStack>,
    #[serde(default)]
    pub model_psf: Option<Array2<f64>>,
    /// Known (ra, dec) positions; detection is used when absent
    #[serde(default)]
    pub sky_coords: Option<Vec<(f64, f64)>>,
}

/// Source of blends grouped into numbered test sets.
pub trait BlendStore {
    /// Ids of every blend in `set_id`, in a stable order.
    fn blend_ids(&self, set_id: &str) -> Result<Vec<String>, HarnessError>;

    fn load_blend(&self, set_id: &str, blend_id: &str) -> Result<BlendData, HarnessError>;
}

/// Blends stored as `<root>/<set_id>/<blend_id>.json`.
#[derive(Debug, Clone)]
pub struct LocalBlendStore {
    root: PathBuf,
}

impl LocalBlendStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a blend file; `.json` is appended when `blend_id` lacks it.
    pub fn blend_path(&self, set_id: &str, blend_id: &str) -> PathBuf {
        let file = if blend_id.ends_with(".json") {
            blend_id.to_string()
        } else {
            format!("{blend_id}.json")
        };
        self.root.join(set_id).join(file)
    }

    pub fn save_blend(&self, set_id: &str, blend: &BlendData) -> Result<PathBuf, HarnessError> {
        let dir = self.root.join(set_id);
        std::fs::create_dir_all(&dir).map_err(|e| HarnessError::io(&dir, e))?;
        let path = self.blend_path(set_id, &blend.blend_id);
        let json = serde_json::to_string(blend).map_err(|e| HarnessError::json(&path, e))?;
        std::fs::write(&path, json).map_err(|e| HarnessError::io(&path, e))?;
        Ok(path)
    }
}

impl BlendStore for LocalBlendStore {
    fn blend_ids(&self, set_id: &str) -> Result<Vec<String>, HarnessError> {
        let dir = self.root.join(set_id);
        let entries = std::fs::read_dir(&dir).map_err(|e| HarnessError::io(&dir, e))?;

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| HarnessError::io(&dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn load_blend(&self, set_id: &str, blend_id: &str) -> Result<BlendData, HarnessError> {
        let path = self.blend_path(set_id, blend_id);
        let json = std::fs::read_to_string(&path).map_err(|e| HarnessError::io(&path, e))?;
        serde_json::from_str(&json).map_err(|e| HarnessError::json(&path, e))
    }
}
