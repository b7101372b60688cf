//! Deterministic oracle for exercising the worker and controller.

use facewarp_core::oracle::{MeshTopology, OracleError, ReconstructionOracle};
use facewarp_core::types::Landmarks;
use facewarp_core::{CompositeResult, FaceBox, Frame, PositionMap, VertexSet};
use ndarray::{array, Array2, Array3};
use std::time::Duration;

/// Identity position maps and one triangle covering any canvas up to 100×100,
/// so the composite takes the live frame's colour everywhere.
pub struct StubOracle {
    topology: MeshTopology,
    geometry: VertexSet,
    reject_red: Option<u8>,
    delay: Duration,
}

impl StubOracle {
    pub fn new() -> Self {
        Self {
            topology: MeshTopology {
                triangles: vec![[0, 1, 2]],
                uv_coords: Array2::from_shape_fn((3, 3), |(_, c)| if c < 2 { 8.0 } else { 0.0 }),
                resolution: 16,
                canonical_vertices: None,
            },
            geometry: array![[-1.0, -1.0, 0.0], [200.0, -1.0, 0.0], [-1.0, 200.0, 0.0]],
            reject_red: None,
            delay: Duration::ZERO,
        }
    }

    /// Report "no face" for frames whose first pixel has this red value.
    pub fn reject_color(mut self, red: u8) -> Self {
        self.reject_red = Some(red);
        self
    }

    /// Sleep this long on every live-frame reconstruction.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl ReconstructionOracle for StubOracle {
    fn process(
        &mut self,
        frame: &Frame,
        face_box: Option<&FaceBox>,
    ) -> Result<Option<PositionMap>, OracleError> {
        if face_box.is_some() && !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.reject_red.is_some() && frame.data.first().copied() == self.reject_red {
            return Ok(None);
        }
        let (h, w) = (frame.height as usize, frame.width as usize);
        Ok(Some(Array3::from_shape_fn((h, w, 3), |(y, x, c)| match c {
            0 => x as f32,
            1 => y as f32,
            _ => 0.0,
        })))
    }

    fn landmarks(&self, _pos: &PositionMap) -> Landmarks {
        self.geometry.clone()
    }

    fn topology(&self) -> &MeshTopology {
        &self.topology
    }

    fn vertices(&self, _pos: &PositionMap) -> VertexSet {
        self.geometry.clone()
    }
}

/// Colour of the top-left output pixel.
pub fn result_color(result: &CompositeResult) -> [u8; 3] {
    result.image.pixel(0, 0)
}
