//! Interface to the 3D face reconstruction model.
//!
//! The pipeline never looks inside the model: it asks for a position map,
//! then derives vertices, landmarks and per-vertex colours through this trait.

use crate::types::{FaceBox, Frame, Landmarks, PositionMap, Texture, VertexSet};
use ndarray::{Array2, ArrayView2, ArrayView3};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("oracle backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Model constants shared by every frame.
#[derive(Debug, Clone)]
pub struct MeshTopology {
    /// Vertex index triples; fixed mesh connectivity.
    pub triangles: Vec<[usize; 3]>,
    /// Per-vertex `(u, v, 0)` texel coordinates, shape `(n, 3)`.
    pub uv_coords: Array2<f32>,
    /// Edge length of the position map the model produces.
    pub resolution: usize,
    /// Mean face in model space, used for pose estimation.
    pub canonical_vertices: Option<VertexSet>,
}

impl MeshTopology {
    pub fn vertex_count(&self) -> usize {
        self.uv_coords.nrows()
    }
}

/// A face reconstruction model.
///
/// `vertices` and `colors_from_texture` default to gathering the map at each
/// vertex's UV coordinate, which is how position-map models index their mesh.
pub trait ReconstructionOracle {
    /// Regress a position map for the face inside `face_box` (the whole frame
    /// when `None`). `Ok(None)` means no face was found.
    fn process(
        &mut self,
        frame: &Frame,
        face_box: Option<&FaceBox>,
    ) -> Result<Option<PositionMap>, OracleError>;

    /// Keypoints read from the position map.
    fn landmarks(&self, pos: &PositionMap) -> Landmarks;

    fn topology(&self) -> &MeshTopology;

    fn vertices(&self, pos: &PositionMap) -> VertexSet {
        sample_at_uv(pos.view(), self.topology().uv_coords.view())
    }

    fn colors_from_texture(&self, texture: &Texture) -> Array2<f32> {
        sample_at_uv(texture.view(), self.topology().uv_coords.view())
    }
}

/// Gather one row per UV coordinate from a `(h, w, c)` map.
///
/// Coordinates are rounded to the nearest texel and clamped to the map, so a
/// texture resampled to a different size is still addressable.
pub fn sample_at_uv(map: ArrayView3<f32>, uv: ArrayView2<f32>) -> Array2<f32> {
    let (h, w, c) = map.dim();
    let mut out = Array2::<f32>::zeros((uv.nrows(), c));
    if h == 0 || w == 0 {
        return out;
    }
    for (i, row) in uv.outer_iter().enumerate() {
        let x = (row[0].round().max(0.0) as usize).min(w - 1);
        let y = (row[1].round().max(0.0) as usize).min(h - 1);
        for ch in 0..c {
            out[[i, ch]] = map[[y, x, ch]];
        }
    }
    out
}
