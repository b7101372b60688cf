//! Face crop via 4-DOF similarity transform.
//!
//! Maps a square region around the face box onto the network's input grid,
//! and maps the regressed position map back into frame coordinates.

use facewarp_core::{FaceBox, PositionMap};
use nalgebra::{Matrix4, Vector4};
use ndarray::{Array3, ArrayView3};

/// A 2×3 similarity transform `[a, -b, tx, b, a, ty]`:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropTransform {
    m: [f32; 6],
}

impl CropTransform {
    /// Transform taking the square crop around `face_box` onto `[0, out_size-1]²`.
    ///
    /// The crop is centred on the box and `crop_scale ×` its mean side long
    /// (truncated to whole pixels).
    pub fn from_box(face_box: &FaceBox, crop_scale: f32, out_size: usize) -> Self {
        let old_size = (face_box.width() + face_box.height()) / 2.0;
        let size = (old_size * crop_scale).trunc();
        let (cx, cy) = face_box.center();
        let half = size / 2.0;
        let last = out_size.saturating_sub(1) as f32;

        let src = [(cx - half, cy - half), (cx - half, cy + half), (cx + half, cy - half)];
        let dst = [(0.0, 0.0), (0.0, last), (last, 0.0)];
        Self::estimate(&src, &dst)
    }

    /// Least-squares similarity from `src` points to `dst` points.
    pub fn estimate(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Self {
        // For each pair (sx, sy) -> (dx, dy):
        //   sx * a - sy * b + tx = dx
        //   sy * a + sx * b + ty = dy
        let mut ata = [0.0f64; 16];
        let mut atb = [0.0f64; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy, dx, dy) = (sx as f64, sy as f64, dx as f64, dy as f64);
            let r1 = [sx, -sy, 1.0, 0.0];
            let r2 = [sy, sx, 0.0, 1.0];
            for j in 0..4 {
                for k in 0..4 {
                    ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
                }
                atb[j] += r1[j] * dx + r2[j] * dy;
            }
        }

        let [a, b, tx, ty] = solve_4x4(&ata, &atb).map(|v| v as f32);
        Self {
            m: [a, -b, tx, b, a, ty],
        }
    }

    pub fn matrix(&self) -> [f32; 6] {
        self.m
    }

    /// Uniform scale factor of the transform.
    pub fn scale(&self) -> f32 {
        (self.m[0] * self.m[0] + self.m[3] * self.m[3]).sqrt()
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, nb, tx, b, a2, ty] = self.m;
        (a * x + nb * y + tx, b * x + a2 * y + ty)
    }

    /// Map a point from crop space back to the source frame.
    pub fn invert(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let (a, b, tx, ty) = (self.m[0], self.m[3], self.m[2], self.m[5]);
        let det = a * a + b * b;
        if det.abs() < 1e-12 {
            return None;
        }
        let (ia, ib) = (a / det, b / det);
        let (dx, dy) = (x - tx, y - ty);
        Some((ia * dx + ib * dy, -ib * dx + ia * dy))
    }

    /// Resample `image` (`h × w × c`) into an `out_size²` crop, bilinear,
    /// zero outside the source.
    pub fn warp(&self, image: ArrayView3<f32>, out_size: usize) -> Array3<f32> {
        let (h, w, c) = image.dim();
        let mut out = Array3::<f32>::zeros((out_size, out_size, c));

        for oy in 0..out_size {
            for ox in 0..out_size {
                let Some((sx, sy)) = self.invert(ox as f32, oy as f32) else {
                    return out;
                };
                let x0 = sx.floor() as i64;
                let y0 = sy.floor() as i64;
                let fx = sx - x0 as f32;
                let fy = sy - y0 as f32;

                let taps = [
                    (x0, y0, (1.0 - fx) * (1.0 - fy)),
                    (x0 + 1, y0, fx * (1.0 - fy)),
                    (x0, y0 + 1, (1.0 - fx) * fy),
                    (x0 + 1, y0 + 1, fx * fy),
                ];
                for (x, y, weight) in taps {
                    if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 || weight == 0.0 {
                        continue;
                    }
                    for ch in 0..c {
                        out[[oy, ox, ch]] += image[[y as usize, x as usize, ch]] * weight;
                    }
                }
            }
        }
        out
    }

    /// Bring a position map regressed in crop space back to frame space.
    ///
    /// `x, y` go through the inverse transform; `z` is divided by the scale.
    pub fn restore(&self, cropped: &PositionMap) -> Option<PositionMap> {
        let scale = self.scale();
        if scale == 0.0 {
            return None;
        }
        let mut pos = cropped.clone();
        for mut texel in pos.lanes_mut(ndarray::Axis(2)) {
            let (x, y) = self.invert(texel[0], texel[1])?;
            texel[0] = x;
            texel[1] = y;
            texel[2] /= scale;
        }
        Some(pos)
    }
}

/// Solve the 4×4 normal equations; identity scale when they are singular.
fn solve_4x4(ata: &[f64; 16], atb: &[f64; 4]) -> [f64; 4] {
    let a = Matrix4::from_row_slice(ata);
    let b = Vector4::from_row_slice(atb);
    match a.lu().solve(&b) {
        Some(x) if x.iter().all(|v| v.is_finite()) => [x[0], x[1], x[2], x[3]],
        _ => [1.0, 0.0, 0.0, 0.0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-2 && (a.1 - b.1).abs() < 1e-2
    }

    #[test]
    fn test_identity_estimate() {
        let pts = [(1.0, 2.0), (30.0, 5.0), (12.0, 40.0)];
        let t = CropTransform::estimate(&pts, &pts);
        let m = t.matrix();
        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!(m[2].abs() < 1e-3 && m[5].abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_points_fall_back_to_identity_scale() {
        let t = CropTransform::estimate(&[], &[]);
        assert_eq!(t.matrix(), [1.0, -0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_rotation_recovered() {
        // 90° rotation, scale 2, shift (5, -3)
        let src = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (2.0, 3.0)];
        let dst: Vec<(f32, f32)> = src.iter().map(|&(x, y)| (-2.0 * y + 5.0, 2.0 * x - 3.0)).collect();
        let t = CropTransform::estimate(&src, &dst);
        let m = t.matrix();
        assert!(m[0].abs() < 1e-4, "a = {}", m[0]);
        assert!((m[3] - 2.0).abs() < 1e-4, "b = {}", m[3]);
        assert!(close((m[2], m[5]), (5.0, -3.0)));
        assert!((t.scale() - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_box_corners_map_to_grid() {
        // 100×100 box centred at (150, 250); crop side 160.
        let b = FaceBox {
            left: 100.0,
            right: 200.0,
            top: 200.0,
            bottom: 300.0,
        };
        let t = CropTransform::from_box(&b, 1.6, 256);
        assert!(close(t.apply(70.0, 170.0), (0.0, 0.0)));
        assert!(close(t.apply(230.0, 330.0), (255.0, 255.0)));
        assert!((t.scale() - 255.0 / 160.0).abs() < 1e-4);
    }

    #[test]
    fn test_invert_round_trip() {
        let b = FaceBox::full_frame(640, 480);
        let t = CropTransform::from_box(&b, 1.6, 256);
        for p in [(0.0, 0.0), (319.5, 239.5), (600.0, 17.0)] {
            let (cx, cy) = t.apply(p.0, p.1);
            let back = t.invert(cx, cy).unwrap();
            assert!(close(back, p), "{p:?} -> {back:?}");
        }
    }

    #[test]
    fn test_warp_samples_source() {
        // Identity transform on a gradient: output equals input where in range.
        let img = Array3::from_shape_fn((8, 8, 3), |(y, x, c)| (y * 8 + x) as f32 + c as f32 * 100.0);
        let pts = [(0.0, 0.0), (7.0, 0.0), (0.0, 7.0)];
        let t = CropTransform::estimate(&pts, &pts);
        let out = t.warp(img.view(), 10);
        assert!((out[[3, 5, 0]] - 29.0).abs() < 1e-3);
        assert!((out[[3, 5, 2]] - 229.0).abs() < 1e-3);
        assert_eq!(out[[9, 9, 0]], 0.0, "outside the source is black");
    }

    #[test]
    fn test_restore_divides_depth_by_scale() {
        let b = FaceBox {
            left: 0.0,
            right: 100.0,
            top: 0.0,
            bottom: 100.0,
        };
        let t = CropTransform::from_box(&b, 1.6, 256);
        let crop_pt = t.apply(40.0, 60.0);
        let cropped = Array3::from_shape_fn((1, 1, 3), |(_, _, c)| match c {
            0 => crop_pt.0,
            1 => crop_pt.1,
            _ => 32.0,
        });
        let pos = t.restore(&cropped).unwrap();
        assert!(close((pos[[0, 0, 0]], pos[[0, 0, 1]]), (40.0, 60.0)));
        assert!((pos[[0, 0, 2]] - 32.0 / t.scale()).abs() < 1e-3);
    }
}
