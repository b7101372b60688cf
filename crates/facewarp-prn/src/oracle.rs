//! Position-map regression network via ONNX Runtime.
//!
//! The network takes an NHWC `1 × S × S × 3` crop in [0, 1] and emits a
//! `1 × R × R × 3` position map normalised by `max_pos`.

use crate::crop::CropTransform;
use crate::manifest::PrnManifest;
use crate::uv_data::{self, KeypointIndex};
use crate::PrnError;
use facewarp_core::types::Landmarks;
use facewarp_core::{FaceBox, Frame, MeshTopology, OracleError, PositionMap, ReconstructionOracle};
use ndarray::{Array2, Array3, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

pub struct PrnOracle {
    session: Session,
    manifest: PrnManifest,
    topology: MeshTopology,
    keypoints: KeypointIndex,
}

impl PrnOracle {
    /// Load the manifest, UV data and ONNX model from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, PrnError> {
        let manifest = PrnManifest::load(model_dir)?;
        let model_path = manifest.model_path(model_dir);
        if !model_path.exists() {
            return Err(PrnError::ModelNotFound(model_path.display().to_string()));
        }

        let (topology, keypoints) = uv_data::load(model_dir, &manifest.data, manifest.resolution)?;

        let session = Session::builder()?
            .with_intra_threads(manifest.intra_threads)?
            .commit_from_file(&model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            input_size = manifest.input_size,
            resolution = manifest.resolution,
            "loaded PRN model"
        );

        Ok(Self {
            session,
            manifest,
            topology,
            keypoints,
        })
    }

    pub fn manifest(&self) -> &PrnManifest {
        &self.manifest
    }

    /// Crop the face region into an NHWC input tensor.
    fn preprocess(&self, frame: &Frame, face_box: &FaceBox) -> (Array4<f32>, CropTransform) {
        let size = self.manifest.input_size;
        let transform = CropTransform::from_box(face_box, self.manifest.crop_scale, size);
        let crop = transform.warp(frame.to_normalized().view(), size);
        let tensor = crop.insert_axis(ndarray::Axis(0));
        (tensor, transform)
    }

    fn regress(&mut self, frame: &Frame, face_box: &FaceBox) -> Result<Option<PositionMap>, PrnError> {
        let (input, transform) = self.preprocess(frame, face_box);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PrnError::InferenceFailed(format!("position map extraction: {e}")))?;

        let Some(cropped) = postprocess(&self.manifest, raw)? else {
            tracing::debug!("non-finite network output; treating as no face");
            return Ok(None);
        };
        Ok(transform.restore(&cropped))
    }
}

/// Reshape the raw network output into a position map in crop pixel units.
fn postprocess(manifest: &PrnManifest, raw: &[f32]) -> Result<Option<PositionMap>, PrnError> {
    let res = manifest.resolution;
    if raw.len() != res * res * 3 {
        return Err(PrnError::InferenceFailed(format!(
            "expected {res}×{res}×3 position map, got {} values",
            raw.len()
        )));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Ok(None);
    }
    let max_pos = manifest.max_pos();
    let map = Array3::from_shape_vec((res, res, 3), raw.iter().map(|v| v * max_pos).collect())
        .map_err(|e| PrnError::InferenceFailed(e.to_string()))?;
    Ok(Some(map))
}

impl ReconstructionOracle for PrnOracle {
    fn process(
        &mut self,
        frame: &Frame,
        face_box: Option<&FaceBox>,
    ) -> Result<Option<PositionMap>, OracleError> {
        if frame.is_empty() {
            return Err(OracleError::InvalidInput(format!(
                "empty frame {}×{}",
                frame.width, frame.height
            )));
        }
        let full = FaceBox::full_frame(frame.width, frame.height);
        let face_box = face_box.unwrap_or(&full);
        Ok(self.regress(frame, face_box)?)
    }

    fn landmarks(&self, pos: &PositionMap) -> Landmarks {
        keypoints_from(pos, &self.keypoints)
    }

    fn topology(&self) -> &MeshTopology {
        &self.topology
    }
}

/// Gather `(x, y, z)` at each keypoint texel.
fn keypoints_from(pos: &PositionMap, keypoints: &KeypointIndex) -> Landmarks {
    let (h, w, _) = pos.dim();
    let mut out = Array2::<f32>::zeros((keypoints.len(), 3));
    for (i, &(col, row)) in keypoints.iter().enumerate() {
        if row < h && col < w {
            for c in 0..3 {
                out[[i, c]] = pos[[row, col, c]];
            }
        }
    }
    out
}
