//! Model directory manifest (`prn.toml`).
//!
//! Every field has a default matching the stock 256×256 position-map network,
//! so a directory without a manifest loads as if it had an empty one.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "prn.toml";

const DEFAULT_RESOLUTION: usize = 256;
const MAX_POS_FACTOR: f32 = 1.1;
const DEFAULT_CROP_SCALE: f32 = 1.6;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bad manifest TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid manifest: {0}")]
    Invalid(String),
}

/// Names of the whitespace-separated UV data files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataFiles {
    /// Flat indices of the position-map texels that belong to the face mesh.
    pub face_ind: String,
    pub triangles: String,
    /// Two rows: keypoint texel columns, then rows.
    pub uv_kpt_ind: String,
    pub canonical_vertices: Option<String>,
}

impl Default for DataFiles {
    fn default() -> Self {
        Self {
            face_ind: "face_ind.txt".into(),
            triangles: "triangles.txt".into(),
            uv_kpt_ind: "uv_kpt_ind.txt".into(),
            canonical_vertices: Some("canonical_vertices.txt".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrnManifest {
    /// ONNX file, relative to the model directory.
    pub model: String,
    /// Edge length of the square network input.
    pub input_size: usize,
    /// Edge length of the position map the network emits.
    pub resolution: usize,
    /// Multiplier restoring network output to pixel units; `resolution × 1.1` when unset.
    pub max_pos: Option<f32>,
    /// Crop edge as a multiple of the face box's mean side.
    pub crop_scale: f32,
    pub intra_threads: usize,
    pub data: DataFiles,
}

impl Default for PrnManifest {
    fn default() -> Self {
        Self {
            model: "prn.onnx".into(),
            input_size: DEFAULT_RESOLUTION,
            resolution: DEFAULT_RESOLUTION,
            max_pos: None,
            crop_scale: DEFAULT_CROP_SCALE,
            intra_threads: 2,
            data: DataFiles::default(),
        }
    }
}

impl PrnManifest {
    pub fn from_toml(src: &str) -> Result<Self, ManifestError> {
        let manifest: Self = toml::from_str(src)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read `prn.toml` from `dir`, falling back to defaults when it is absent.
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            tracing::debug!(dir = %dir.display(), "no manifest; using defaults");
            return Ok(Self::default());
        }
        let src = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&src)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        if self.input_size == 0 || self.resolution == 0 {
            return Err(ManifestError::Invalid(
                "input_size and resolution must be positive".into(),
            ));
        }
        if !(self.crop_scale.is_finite() && self.crop_scale > 0.0) {
            return Err(ManifestError::Invalid(format!(
                "crop_scale must be positive, got {}",
                self.crop_scale
            )));
        }
        if let Some(m) = self.max_pos {
            if !(m.is_finite() && m > 0.0) {
                return Err(ManifestError::Invalid(format!("max_pos must be positive, got {m}")));
            }
        }
        Ok(())
    }

    pub fn max_pos(&self) -> f32 {
        self.max_pos
            .unwrap_or(self.resolution as f32 * MAX_POS_FACTOR)
    }

    pub fn model_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.model)
    }
}
