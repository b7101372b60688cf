//! facewarp-core — Face texture swap pipeline.
//!
//! Reconstructs a live frame through a position-map oracle, lifts its UV
//! texture, and renders it onto the geometry of a fixed reference face.

pub mod oracle;
pub mod pose;
pub mod processor;
pub mod raster;
pub mod remap;
pub mod types;
pub mod visibility;

pub use oracle::{MeshTopology, OracleError, ReconstructionOracle};
pub use processor::{CycleOutput, FrameProcessor, ProcessError, ProcessorOptions};
pub use types::{
    CompositeResult, Diagnostics, FaceBox, Frame, Pose, PositionMap, ResultView, Texture,
    VertexSet, TEXTURE_SIZE,
};
