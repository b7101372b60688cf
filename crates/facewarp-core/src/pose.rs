//! Head pose estimation from a reconstructed vertex set.
//!
//! Fits a similarity transform between the live vertices and the model's
//! canonical (frontal) vertices, then reads Euler angles off its rotation.

use crate::types::Pose;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use nalgebra::{Matrix3, Matrix3x4, Vector3};
use ndarray::ArrayView2;

const BOX_REAR_SIZE: f32 = 90.0;
const BOX_REAR_DEPTH: f32 = 0.0;
const BOX_FRONT_SIZE: f32 = 105.0;
const BOX_FRONT_DEPTH: f32 = 110.0;
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Landmarks averaged to anchor the box (jaw line and brows).
const BOX_ANCHOR_LANDMARKS: usize = 27;

fn centered(points: ArrayView2<f32>) -> Option<(Vec<Vector3<f64>>, Vector3<f64>)> {
    if points.nrows() == 0 || points.ncols() < 3 {
        return None;
    }
    let pts: Vec<Vector3<f64>> = points
        .outer_iter()
        .map(|p| Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64))
        .collect();
    let mean = pts.iter().sum::<Vector3<f64>>() / pts.len() as f64;
    Some((pts.iter().map(|p| p - mean).collect(), mean))
}

fn rms(points: &[Vector3<f64>]) -> f64 {
    (points.iter().map(|p| p.norm_squared()).sum::<f64>() / points.len() as f64).sqrt()
}

/// Least-squares similarity `[sR | t]` relating `moving` to `fixed` (Kabsch with scale).
fn similarity_transform(fixed: ArrayView2<f32>, moving: ArrayView2<f32>) -> Option<Matrix3x4<f64>> {
    if fixed.nrows() != moving.nrows() {
        return None;
    }
    let (p0, mean0) = centered(fixed)?;
    let (p1, mean1) = centered(moving)?;

    let covariance: Matrix3<f64> = p0
        .iter()
        .zip(&p1)
        .map(|(a, b)| a * b.transpose())
        .sum();

    let svd = covariance.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut rotation = u * v_t;
    if rotation.determinant() < 0.0 {
        let flipped = -rotation.column(2);
        rotation.set_column(2, &flipped);
    }

    let spread = rms(&p1);
    if spread == 0.0 {
        return None;
    }
    let scale = rms(&p0) / spread;
    let translation = mean0 - mean1;

    let mut p = Matrix3x4::zeros();
    p.fixed_view_mut::<3, 3>(0, 0).copy_from(&(rotation * scale));
    p.set_column(3, &translation);
    Some(p)
}

/// Rotation part of a camera matrix: the first two rows normalised, third as their cross product.
fn rotation_of(p: &Matrix3x4<f64>) -> Option<Matrix3<f64>> {
    let r1 = p.fixed_view::<1, 3>(0, 0).transpose();
    let r2 = p.fixed_view::<1, 3>(1, 0).transpose();
    let (n1, n2) = (r1.norm(), r2.norm());
    if n1 == 0.0 || n2 == 0.0 {
        return None;
    }
    let r1 = r1 / n1;
    let r2 = r2 / n2;
    let r3 = r1.cross(&r2);
    Some(Matrix3::from_rows(&[r1.transpose(), r2.transpose(), r3.transpose()]))
}

/// Euler angles `(x, y, z)` of a rotation matrix, radians.
fn rotation_to_angles(r: &Matrix3<f64>) -> [f64; 3] {
    let sin_x = r[(2, 0)].clamp(-1.0, 1.0);
    let x = sin_x.asin();
    let cos_x = x.cos();
    if cos_x.abs() < 1e-9 {
        // gimbal lock: roll is folded into yaw
        return [x, r[(0, 1)].atan2(r[(0, 2)]), 0.0];
    }
    let y = (r[(2, 1)] / cos_x).atan2(r[(2, 2)] / cos_x);
    let z = (r[(1, 0)] / cos_x).atan2(r[(0, 0)] / cos_x);
    [x, y, z]
}

/// Estimate head pose of `vertices` relative to `canonical`.
///
/// Returns `None` when the two sets differ in length or are degenerate.
pub fn estimate_pose(vertices: ArrayView2<f32>, canonical: ArrayView2<f32>) -> Option<Pose> {
    let p = similarity_transform(vertices, canonical)?;
    let r = rotation_of(&p)?;
    let angles = rotation_to_angles(&r);

    let mut camera_matrix = [[0.0f32; 4]; 3];
    for (row, out) in camera_matrix.iter_mut().enumerate() {
        for (col, v) in out.iter_mut().enumerate() {
            *v = p[(row, col)] as f32;
        }
    }

    Some(Pose {
        camera_matrix,
        angles: angles.map(|a| a as f32),
    })
}

/// The 10 corners of the pose box (rear square then front square, each closed).
fn box_corners() -> [[f32; 3]; 10] {
    let (rs, rd, fs, fd) = (BOX_REAR_SIZE, BOX_REAR_DEPTH, BOX_FRONT_SIZE, BOX_FRONT_DEPTH);
    [
        [-rs, -rs, rd],
        [-rs, rs, rd],
        [rs, rs, rd],
        [rs, -rs, rd],
        [-rs, -rs, rd],
        [-fs, -fs, fd],
        [-fs, fs, fd],
        [fs, fs, fd],
        [fs, -fs, fd],
        [-fs, -fs, fd],
    ]
}

/// Project the pose box into image space, centred on the landmark anchor.
pub fn project_pose_box(pose: &Pose, landmarks: ArrayView2<f32>) -> Vec<(f32, f32)> {
    let m = &pose.camera_matrix;
    let mut points: Vec<(f32, f32)> = box_corners()
        .iter()
        .map(|c| {
            let x = m[0][0] * c[0] + m[0][1] * c[1] + m[0][2] * c[2] + m[0][3];
            let y = m[1][0] * c[0] + m[1][1] * c[1] + m[1][2] * c[2] + m[1][3];
            (x, y)
        })
        .collect();

    let rear_cx = points[..4].iter().map(|p| p.0).sum::<f32>() / 4.0;
    let rear_cy = points[..4].iter().map(|p| p.1).sum::<f32>() / 4.0;

    let anchors = landmarks.nrows().min(BOX_ANCHOR_LANDMARKS);
    let (kx, ky) = if anchors == 0 {
        (rear_cx, rear_cy)
    } else {
        let rows = landmarks.slice(ndarray::s![..anchors, ..]);
        (
            rows.column(0).sum() / anchors as f32,
            rows.column(1).sum() / anchors as f32,
        )
    };

    for p in &mut points {
        p.0 = (p.0 - rear_cx + kx).trunc();
        p.1 = (p.1 - rear_cy + ky).trunc();
    }
    points
}

fn thick_line(image: &mut RgbImage, a: (f32, f32), b: (f32, f32)) {
    for (dx, dy) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)] {
        draw_line_segment_mut(image, (a.0 + dx, a.1 + dy), (b.0 + dx, b.1 + dy), BOX_COLOR);
    }
}

/// Draw the projected head-pose box onto `image`.
pub fn draw_pose_box(image: &mut RgbImage, pose: &Pose, landmarks: ArrayView2<f32>) {
    let pts = project_pose_box(pose, landmarks);
    for i in 0..pts.len() {
        thick_line(image, pts[i], pts[(i + 1) % pts.len()]);
    }
    for (rear, front) in [(1, 6), (2, 7), (3, 8)] {
        thick_line(image, pts[rear], pts[front]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn canonical() -> Array2<f32> {
        ndarray::array![
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 1.0],
            [0.0, 12.0, 2.0],
            [3.0, 4.0, 15.0],
            [-7.0, 5.0, -4.0],
            [6.0, -8.0, 3.0],
        ]
    }

    fn rotate_z(points: &Array2<f32>, theta: f32) -> Array2<f32> {
        let (s, c) = theta.sin_cos();
        let mut out = points.clone();
        for mut row in out.outer_iter_mut() {
            let (x, y) = (row[0], row[1]);
            row[0] = c * x - s * y;
            row[1] = s * x + c * y;
        }
        out
    }

    #[test]
    fn test_identity_pose() {
        let c = canonical();
        let pose = estimate_pose(c.view(), c.view()).unwrap();
        for (r, row) in pose.camera_matrix.iter().enumerate() {
            for (col, v) in row.iter().enumerate() {
                let expected = if r == col { 1.0 } else { 0.0 };
                assert!((v - expected).abs() < 1e-4, "P[{r}][{col}] = {v}");
            }
        }
        assert!(pose.angles.iter().all(|a| a.abs() < 1e-4), "{:?}", pose.angles);
    }

    #[test]
    fn test_roll_recovered() {
        let c = canonical();
        let theta = 0.3f32;
        let live = rotate_z(&c, theta);
        let pose = estimate_pose(live.view(), c.view()).unwrap();
        assert!((pose.angles[2] - theta).abs() < 1e-3, "roll = {}", pose.angles[2]);
        assert!(pose.angles[0].abs() < 1e-3);
        assert!(pose.angles[1].abs() < 1e-3);
    }

    #[test]
    fn test_scale_recovered() {
        let c = canonical();
        let live = c.mapv(|v| v * 2.0);
        let pose = estimate_pose(live.view(), c.view()).unwrap();
        assert!((pose.camera_matrix[0][0] - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_mismatched_lengths() {
        let c = canonical();
        let short = c.slice(ndarray::s![..3, ..]).to_owned();
        assert!(estimate_pose(short.view(), c.view()).is_none());
    }

    #[test]
    fn test_pose_box_anchored_on_landmarks() {
        let pose = Pose {
            camera_matrix: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
            angles: [0.0; 3],
        };
        let landmarks = ndarray::array![[100.0, 50.0, 0.0], [120.0, 70.0, 0.0]];
        let pts = project_pose_box(&pose, landmarks.view());
        assert_eq!(pts.len(), 10);
        // rear square centred at the landmark mean (110, 60)
        let cx: f32 = pts[..4].iter().map(|p| p.0).sum::<f32>() / 4.0;
        let cy: f32 = pts[..4].iter().map(|p| p.1).sum::<f32>() / 4.0;
        assert_eq!((cx, cy), (110.0, 60.0));
        assert_eq!(pts[0], (20.0, -30.0));
    }

    #[test]
    fn test_draw_pose_box_marks_pixels() {
        let pose = Pose {
            camera_matrix: [[0.1, 0.0, 0.0, 0.0], [0.0, 0.1, 0.0, 0.0], [0.0, 0.0, 0.1, 0.0]],
            angles: [0.0; 3],
        };
        let landmarks = ndarray::array![[32.0, 32.0, 0.0]];
        let mut img = RgbImage::new(64, 64);
        draw_pose_box(&mut img, &pose, landmarks.view());
        let green = img.pixels().filter(|p| p.0 == [0, 255, 0]).count();
        assert!(green > 0, "pose box should be drawn");
    }
}
