use image::{Rgb, RgbImage};
use ndarray::{Array2, Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Edge length of the square texture the pipeline works in.
pub const TEXTURE_SIZE: usize = 256;

/// Dense per-pixel 3D surface coordinates, shape `(res, res, 3)`.
///
/// Pixel `(row, col)` holds the image-space `(x, y, z)` of the surface point
/// whose UV coordinate is `(col, row)`.
pub type PositionMap = Array3<f32>;

/// One 3D point per model vertex, shape `(n, 3)`.
pub type VertexSet = Array2<f32>;

/// Colour image in texture space, shape `(h, w, 3)`, values in [0, 1].
pub type Texture = Array3<f32>;

/// Facial keypoints, shape `(k, 3)`.
pub type Landmarks = Array2<f32>;

/// An 8-bit, 3-channel image (row-major, interleaved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap raw interleaved pixel data, checking its length.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// A frame where every pixel has the same colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Colour at `(x, y)`. Panics when out of bounds, like slice indexing.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Convert to `(h, w, 3)` floats in [0, 1].
    pub fn to_normalized(&self) -> Array3<f32> {
        let (h, w) = (self.height as usize, self.width as usize);
        Array3::from_shape_fn((h, w, 3), |(y, x, c)| {
            self.data[(y * w + x) * 3 + c] as f32 / 255.0
        })
    }

    /// Convert `(h, w, 3)` floats in [0, 1] back to 8-bit, truncating.
    pub fn from_normalized(image: ArrayView3<f32>) -> Self {
        let (h, w, c) = image.dim();
        let mut data = Vec::with_capacity(h * w * 3);
        for y in 0..h {
            for x in 0..w {
                for ch in 0..3 {
                    let v = if ch < c { image[[y, x, ch]] } else { 0.0 };
                    data.push(unit_to_u8(v));
                }
            }
        }
        Self {
            data,
            width: w as u32,
            height: h as u32,
        }
    }

    pub fn from_rgb_image(image: &RgbImage) -> Self {
        Self {
            data: image.as_raw().clone(),
            width: image.width(),
            height: image.height(),
        }
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| Rgb(self.pixel(x, y)))
    }
}

/// Map a [0, 1] intensity to 8 bits: scale by 255, truncate, saturate.
///
/// `b as f32 / 255.0` maps back to `b` for every byte value.
pub fn unit_to_u8(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    (v * 255.0).trunc().clamp(0.0, 255.0) as u8
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Axis-aligned face region in pixel coordinates, inclusive on all sides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl FaceBox {
    /// Box covering the whole frame: `[0, W-1, 0, H-1]`.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self {
            left: 0.0,
            right: width.saturating_sub(1) as f32,
            top: 0.0,
            bottom: height.saturating_sub(1) as f32,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.right - self.width() / 2.0,
            self.bottom - self.height() / 2.0,
        )
    }
}

/// Head pose recovered from a vertex set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// 3×4 similarity camera matrix `[sR | t]`, row-major.
    pub camera_matrix: [[f32; 4]; 3],
    /// Euler angles (pitch, yaw, roll) in radians.
    pub angles: [f32; 3],
}

/// Which image a processing cycle publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultView {
    /// Reference face wearing the live frame's texture.
    #[default]
    Composite,
    /// Live frame's UV texture with unreliable texels zeroed.
    MaskedTexture,
    /// The live frame, unchanged.
    Input,
    /// The live frame with the projected head-pose box drawn on it.
    PoseBox,
}

impl FromStr for ResultView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "composite" => Ok(Self::Composite),
            "masked-texture" => Ok(Self::MaskedTexture),
            "input" => Ok(Self::Input),
            "pose-box" => Ok(Self::PoseBox),
            other => Err(format!(
                "unknown view {other:?} (expected composite, masked-texture, input or pose-box)"
            )),
        }
    }
}

/// Intermediate artefacts of one cycle, collected only when requested.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    /// Vertices with the vertical axis flipped to model convention (`H-1-y`).
    pub flipped_vertices: VertexSet,
    pub landmarks: Landmarks,
    /// `None` when the oracle has no canonical vertices.
    pub pose: Option<Pose>,
    /// Bilinear remap of the live frame through its position map.
    pub texture: Texture,
    /// UV coverage mask resampled to the texture size.
    pub uv_mask: Array2<f32>,
    pub masked_texture: Texture,
    /// Reference-face coverage mask (0 or 1).
    pub face_mask: Array2<f32>,
    /// Alpha blend of reference and rendered face, before boundary cleanup.
    pub blended: Frame,
}

/// The published output of one completed worker cycle.
#[derive(Debug, Clone)]
pub struct CompositeResult {
    pub image: Frame,
    /// Count of results published by the controller so far, this one included;
    /// keeps counting across restarts.
    pub sequence: u64,
    /// Generation of the input frame this result was computed from.
    pub input_generation: u64,
    pub diagnostics: Option<Diagnostics>,
}
