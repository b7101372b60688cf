//! Per-frame face-swap pipeline.
//!
//! One call to [`FrameProcessor::process`] takes a live frame, reconstructs
//! it through the oracle, and renders its texture onto the reference face's
//! geometry. Missing detections are reported as `Ok(None)` so the caller can
//! keep its previous result.

use crate::oracle::{OracleError, ReconstructionOracle};
use crate::pose;
use crate::raster;
use crate::remap::{self, Interpolation};
use crate::types::{
    unit_to_u8, Diagnostics, FaceBox, Frame, Landmarks, Pose, PositionMap, ResultView, Texture,
    VertexSet, TEXTURE_SIZE,
};
use crate::visibility;
use ndarray::{s, Array2, Array3, Axis, Zip};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("oracle: {0}")]
    Oracle(#[from] OracleError),
    #[error("empty frame ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
}

/// Knobs for a [`FrameProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Which image each cycle returns.
    pub view: ResultView,
    /// Collect [`Diagnostics`] alongside the output image.
    pub diagnostics: bool,
    /// Apply the saturating mask subtraction to the composite.
    pub boundary_cleanup: bool,
    /// Edge length of the working texture.
    pub texture_size: usize,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            view: ResultView::Composite,
            diagnostics: false,
            boundary_cleanup: true,
            texture_size: TEXTURE_SIZE,
        }
    }
}

/// Output of one processed frame.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    pub image: Frame,
    pub diagnostics: Option<Diagnostics>,
}

/// Result of the texture-swap stage.
#[derive(Debug, Clone)]
pub struct SwapOutput {
    /// Final 8-bit composite.
    pub image: Frame,
    /// Alpha blend before boundary cleanup.
    pub blended: Frame,
    /// Reference-face coverage (0 or 1).
    pub face_mask: Array2<f32>,
}

/// Geometry of the reference face; constant for the processor's lifetime.
#[derive(Debug, Clone)]
struct ReferenceGeometry {
    vertices: VertexSet,
    face_mask: Array2<f32>,
}

/// Live-frame analysis shared by the diagnostic views.
struct Analysis {
    vertices: VertexSet,
    landmarks: Landmarks,
    pose: Option<Pose>,
    texture: Texture,
    uv_mask: Array2<f32>,
    masked_texture: Texture,
}

pub struct FrameProcessor<O> {
    oracle: O,
    reference: Frame,
    reference_normalized: Array3<f32>,
    reference_geometry: Option<ReferenceGeometry>,
    options: ProcessorOptions,
}

impl<O: ReconstructionOracle> FrameProcessor<O> {
    pub fn new(oracle: O, reference: Frame, options: ProcessorOptions) -> Self {
        let reference_normalized = reference.to_normalized();
        Self {
            oracle,
            reference,
            reference_normalized,
            reference_geometry: None,
            options,
        }
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn reference(&self) -> &Frame {
        &self.reference
    }

    pub fn into_oracle(self) -> O {
        self.oracle
    }

    /// Run the full pipeline on one live frame.
    ///
    /// Returns `Ok(None)` when the oracle finds no face in the live frame or
    /// the reference face.
    pub fn process(&mut self, frame: &Frame) -> Result<Option<CycleOutput>, ProcessError> {
        if frame.is_empty() {
            return Err(ProcessError::EmptyFrame {
                width: frame.width,
                height: frame.height,
            });
        }

        let face_box = FaceBox::full_frame(frame.width, frame.height);
        let Some(pos) = self.oracle.process(frame, Some(&face_box))? else {
            tracing::debug!("no face in live frame");
            return Ok(None);
        };
        let normalized = frame.to_normalized();

        let needs_analysis = self.options.diagnostics
            || matches!(self.options.view, ResultView::MaskedTexture | ResultView::PoseBox);
        let analysis = needs_analysis.then(|| self.analyze(frame, &pos, &normalized));

        let needs_swap = self.options.diagnostics || self.options.view == ResultView::Composite;
        let swap = if needs_swap {
            match self.swap_texture(frame)? {
                Some(swap) => Some(swap),
                None => return Ok(None),
            }
        } else {
            None
        };

        let image = match (self.options.view, &analysis, &swap) {
            (ResultView::Composite, _, Some(swap)) => swap.image.clone(),
            (ResultView::MaskedTexture, Some(a), _) => Frame::from_normalized(a.masked_texture.view()),
            (ResultView::PoseBox, Some(a), _) => {
                let mut canvas = frame.to_rgb_image();
                if let Some(pose) = &a.pose {
                    pose::draw_pose_box(&mut canvas, pose, a.landmarks.view());
                }
                Frame::from_rgb_image(&canvas)
            }
            _ => frame.clone(),
        };

        let diagnostics = match (self.options.diagnostics, analysis, swap) {
            (true, Some(a), Some(swap)) => Some(Diagnostics {
                flipped_vertices: flip_vertical(&a.vertices, frame.height),
                landmarks: a.landmarks,
                pose: a.pose,
                texture: a.texture,
                uv_mask: a.uv_mask,
                masked_texture: a.masked_texture,
                face_mask: swap.face_mask,
                blended: swap.blended,
            }),
            _ => None,
        };

        Ok(Some(CycleOutput { image, diagnostics }))
    }

    /// Vertices, landmarks, pose and the visibility-masked texture of a live frame.
    fn analyze(&self, frame: &Frame, pos: &PositionMap, normalized: &Array3<f32>) -> Analysis {
        let (h, w) = (frame.height as usize, frame.width as usize);
        let topology = self.oracle.topology();

        let vertices = self.oracle.vertices(pos);
        let landmarks = self.oracle.landmarks(pos);
        let pose = topology
            .canonical_vertices
            .as_ref()
            .and_then(|canonical| pose::estimate_pose(vertices.view(), canonical.view()));

        let size = self.options.texture_size;
        let mut texture = remap::remap(normalized.view(), pos, Interpolation::Bilinear);
        if texture.dim().0 != size || texture.dim().1 != size {
            texture = remap::resize_area(texture.view(), size, size);
        }

        let vis = visibility::vertex_visibility(vertices.view(), &topology.triangles, h, w);
        let uv_mask = visibility::uv_mask(
            vis.view(),
            &topology.triangles,
            topology.uv_coords.view(),
            topology.resolution,
        );
        let uv_mask = remap::resize_area_2d(uv_mask.view(), size, size);

        let mut masked_texture = texture.clone();
        Zip::from(masked_texture.lanes_mut(Axis(2)))
            .and(&uv_mask)
            .for_each(|mut texel, &m| texel.mapv_inplace(|v| v * m));

        Analysis {
            vertices,
            landmarks,
            pose,
            texture,
            uv_mask,
            masked_texture,
        }
    }

    /// Reconstruct the reference face once; later calls reuse the cached geometry.
    fn reference_geometry(&mut self) -> Result<Option<&ReferenceGeometry>, ProcessError> {
        if self.reference_geometry.is_none() {
            let Some(pos) = self.oracle.process(&self.reference, None)? else {
                tracing::debug!("no face in reference image");
                return Ok(None);
            };
            let vertices = self.oracle.vertices(&pos);
            let (h, w) = (self.reference.height as usize, self.reference.width as usize);

            let ones = Array2::<f32>::ones((vertices.nrows(), 1));
            let coverage = raster::render(
                vertices.view(),
                ones.view(),
                &self.oracle.topology().triangles,
                h,
                w,
            );
            let face_mask = coverage
                .index_axis(Axis(2), 0)
                .mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });

            tracing::debug!(
                vertices = vertices.nrows(),
                covered = face_mask.sum() as usize,
                "reference geometry reconstructed"
            );
            self.reference_geometry = Some(ReferenceGeometry {
                vertices,
                face_mask,
            });
        }
        Ok(self.reference_geometry.as_ref())
    }

    /// Render the reference geometry wearing `new_face`'s texture.
    ///
    /// The output has the reference image's size. Returns `Ok(None)` when
    /// either face is not found.
    pub fn swap_texture(&mut self, new_face: &Frame) -> Result<Option<SwapOutput>, ProcessError> {
        if self.reference_geometry()?.is_none() {
            return Ok(None);
        }

        let Some(new_pos) = self.oracle.process(new_face, None)? else {
            tracing::debug!("no face in appearance frame");
            return Ok(None);
        };
        let new_texture = remap::remap(
            new_face.to_normalized().view(),
            &new_pos,
            Interpolation::Nearest,
        );
        let new_colors = self.oracle.colors_from_texture(&new_texture);

        let Some(geometry) = self.reference_geometry.as_ref() else {
            return Ok(None);
        };
        let (h, w) = (self.reference.height as usize, self.reference.width as usize);
        let rendered = raster::render(
            geometry.vertices.view(),
            new_colors.view(),
            &self.oracle.topology().triangles,
            h,
            w,
        );

        let mut blend = self.reference_normalized.clone();
        let channels = rendered.dim().2.min(3);
        Zip::from(blend.lanes_mut(Axis(2)))
            .and(rendered.lanes(Axis(2)))
            .and(&geometry.face_mask)
            .for_each(|mut out, new, &m| {
                for c in 0..3 {
                    let fresh = if c < channels { new[c] } else { 0.0 };
                    out[c] = out[c] * (1.0 - m) + fresh * m;
                }
            });

        let blended = Frame::from_normalized(blend.view());
        let image = if self.options.boundary_cleanup {
            clean_boundary(&blended, &geometry.face_mask)
        } else {
            blended.clone()
        };

        Ok(Some(SwapOutput {
            image,
            blended,
            face_mask: geometry.face_mask.clone(),
        }))
    }
}

/// Two saturating subtractions against the 8-bit mask:
/// `out = m ⊖ (m ⊖ composite)` with `m = mask × 255` on every channel.
///
/// Inside the mask this reproduces the composite; outside it yields black.
pub fn clean_boundary(composite: &Frame, mask: &Array2<f32>) -> Frame {
    let w = composite.width as usize;
    let mut data = composite.data.clone();
    for (i, px) in data.chunks_exact_mut(3).enumerate() {
        let m = mask
            .get([i / w, i % w])
            .map(|&v| unit_to_u8(v))
            .unwrap_or(0);
        for c in px.iter_mut() {
            let mask_out = m.saturating_sub(*c);
            *c = m.saturating_sub(mask_out);
        }
    }
    Frame {
        data,
        width: composite.width,
        height: composite.height,
    }
}

/// Copy of `vertices` with the vertical axis flipped: `y' = height - 1 - y`.
pub fn flip_vertical(vertices: &VertexSet, height: u32) -> VertexSet {
    let mut flipped = vertices.clone();
    let top = height as f32 - 1.0;
    flipped.slice_mut(s![.., 1]).mapv_inplace(|y| top - y);
    flipped
}
