//! facewarp-prn — position-map regression network behind the oracle trait.
//!
//! A model directory holds the ONNX network, an optional `prn.toml`
//! manifest and the UV data files describing the mesh it indexes.

pub mod crop;
pub mod manifest;
pub mod oracle;
pub mod uv_data;

pub use manifest::{ManifestError, PrnManifest};
pub use oracle::PrnOracle;

use facewarp_core::OracleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrnError {
    #[error("model file not found: {0} (set FACEWARP_MODEL_DIR or add prn.toml)")]
    ModelNotFound(String),
    #[error("manifest: {0}")]
    Manifest(#[from] ManifestError),
    #[error("UV data {file}: {reason}")]
    UvData { file: String, reason: String },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<PrnError> for OracleError {
    fn from(e: PrnError) -> Self {
        OracleError::Backend(Box::new(e))
    }
}
