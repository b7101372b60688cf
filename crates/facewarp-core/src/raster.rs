//! Flat-shaded triangle rasterisation with a Z-buffer.
//!
//! Each triangle is filled with the mean of its three vertex attributes at
//! the mean of its three depths. Larger Z is nearer to the camera.

use ndarray::{Array2, Array3, ArrayView2};

const EMPTY_DEPTH: f32 = -999_999.0;

/// Barycentric containment test: `u >= 0, v >= 0, u + v < 1`.
///
/// The edge opposite the first vertex is excluded, so a pixel on a shared
/// edge is claimed by exactly one of the two triangles.
pub fn point_in_triangle(p: [f32; 2], tri: [[f32; 2]; 3]) -> bool {
    let v0 = [tri[2][0] - tri[0][0], tri[2][1] - tri[0][1]];
    let v1 = [tri[1][0] - tri[0][0], tri[1][1] - tri[0][1]];
    let v2 = [p[0] - tri[0][0], p[1] - tri[0][1]];

    let dot00 = v0[0] * v0[0] + v0[1] * v0[1];
    let dot01 = v0[0] * v1[0] + v0[1] * v1[1];
    let dot02 = v0[0] * v2[0] + v0[1] * v2[1];
    let dot11 = v1[0] * v1[0] + v1[1] * v1[1];
    let dot12 = v1[0] * v2[0] + v1[1] * v2[1];

    let denom = dot00 * dot11 - dot01 * dot01;
    let inv = if denom == 0.0 { 0.0 } else { 1.0 / denom };

    let u = (dot11 * dot02 - dot01 * dot12) * inv;
    let v = (dot00 * dot12 - dot01 * dot02) * inv;

    u >= 0.0 && v >= 0.0 && u + v < 1.0
}

/// Integer pixel range covered by a triangle's bounding box, clamped to the canvas.
fn pixel_bounds(tri: &[[f32; 2]; 3], height: usize, width: usize) -> Option<(usize, usize, usize, usize)> {
    let min_x = tri.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min).ceil();
    let max_x = tri.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max).floor();
    let min_y = tri.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min).ceil();
    let max_y = tri.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max).floor();

    if !(min_x.is_finite() && max_x.is_finite() && min_y.is_finite() && max_y.is_finite()) {
        return None;
    }

    let umin = min_x.max(0.0);
    let umax = max_x.min(width as f32 - 1.0);
    let vmin = min_y.max(0.0);
    let vmax = max_y.min(height as f32 - 1.0);
    if umax < umin || vmax < vmin {
        return None;
    }
    Some((umin as usize, umax as usize, vmin as usize, vmax as usize))
}

fn triangle_xy(vertices: &ArrayView2<f32>, tri: &[usize; 3]) -> [[f32; 2]; 3] {
    tri.map(|i| [vertices[[i, 0]], vertices[[i, 1]]])
}

fn triangle_depth(vertices: &ArrayView2<f32>, tri: &[usize; 3]) -> f32 {
    tri.iter()
        .map(|&i| if vertices.ncols() > 2 { vertices[[i, 2]] } else { 0.0 })
        .sum::<f32>()
        / 3.0
}

/// Walk every covered pixel, calling `fill(triangle_index, y, x)` when the
/// triangle is nearer than whatever was drawn there before.
fn rasterize<F>(
    vertices: ArrayView2<f32>,
    triangles: &[[usize; 3]],
    height: usize,
    width: usize,
    mut fill: F,
) -> Array2<f32>
where
    F: FnMut(usize, usize, usize),
{
    let mut depth = Array2::<f32>::from_elem((height, width), EMPTY_DEPTH);
    if height == 0 || width == 0 {
        return depth;
    }

    let n = vertices.nrows();
    for (t, tri) in triangles.iter().enumerate() {
        if tri.iter().any(|&i| i >= n) {
            continue;
        }
        let xy = triangle_xy(&vertices, tri);
        let Some((umin, umax, vmin, vmax)) = pixel_bounds(&xy, height, width) else {
            continue;
        };
        let tri_depth = triangle_depth(&vertices, tri);

        for u in umin..=umax {
            for v in vmin..=vmax {
                if tri_depth > depth[[v, u]] && point_in_triangle([u as f32, v as f32], xy) {
                    depth[[v, u]] = tri_depth;
                    fill(t, v, u);
                }
            }
        }
    }

    depth
}

/// Render per-vertex attributes onto a `height × width` canvas.
///
/// `vertices` is `(n, 3)` in image space (X right, Y down, Z towards the
/// camera); `attributes` is `(n, c)`. Uncovered pixels stay 0. The per-face
/// mean is accumulated in `f64` so three equal attributes reproduce exactly.
pub fn render(
    vertices: ArrayView2<f32>,
    attributes: ArrayView2<f32>,
    triangles: &[[usize; 3]],
    height: usize,
    width: usize,
) -> Array3<f32> {
    let channels = attributes.ncols();
    let mut image = Array3::<f32>::zeros((height, width, channels));

    let tri_attr: Vec<Vec<f32>> = triangles
        .iter()
        .map(|tri| {
            (0..channels)
                .map(|c| {
                    let sum: f64 = tri
                        .iter()
                        .map(|&i| attributes.get([i, c]).copied().unwrap_or(0.0) as f64)
                        .sum();
                    (sum / 3.0) as f32
                })
                .collect()
        })
        .collect();

    rasterize(vertices, triangles, height, width, |t, y, x| {
        for (c, value) in tri_attr[t].iter().enumerate() {
            image[[y, x, c]] = *value;
        }
    });

    image
}

/// Nearest depth at every pixel; uncovered pixels hold a large negative sentinel.
pub fn depth_buffer(
    vertices: ArrayView2<f32>,
    triangles: &[[usize; 3]],
    height: usize,
    width: usize,
) -> Array2<f32> {
    rasterize(vertices, triangles, height, width, |_, _, _| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_point_in_triangle_interior() {
        let tri = [[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]];
        assert!(point_in_triangle([2.0, 2.0], tri));
        assert!(!point_in_triangle([8.0, 8.0], tri));
    }

    #[test]
    fn test_point_in_triangle_edges() {
        let tri = [[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]];
        // first vertex and the two edges leaving it are included
        assert!(point_in_triangle([0.0, 0.0], tri));
        assert!(point_in_triangle([5.0, 0.0], tri));
        assert!(point_in_triangle([0.0, 5.0], tri));
        // the opposite edge is not
        assert!(!point_in_triangle([10.0, 0.0], tri));
        assert!(!point_in_triangle([5.0, 5.0], tri));
    }

    #[test]
    fn test_point_in_degenerate_triangle() {
        let tri = [[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        // zero area: inverse denominator collapses to 0, only the anchor passes
        assert!(point_in_triangle([1.0, 1.0], tri));
    }

    #[test]
    fn test_render_flat_color_and_background() {
        let vertices = array![[-1.0, -1.0, 0.0], [20.0, -1.0, 0.0], [-1.0, 20.0, 0.0]];
        let colors = array![[0.0, 0.3, 0.6], [0.3, 0.3, 0.6], [0.6, 0.3, 0.6]];
        let img = render(vertices.view(), colors.view(), &[[0, 1, 2]], 16, 16);

        assert_eq!(img.dim(), (16, 16, 3));
        let px = img.slice(ndarray::s![2, 2, ..]).to_vec();
        assert!((px[0] - 0.3).abs() < 1e-6, "mean of vertex reds, got {}", px[0]);
        assert!((px[1] - 0.3).abs() < 1e-6);
        assert!((px[2] - 0.6).abs() < 1e-6);
        // far corner is outside the hypotenuse x + y = 19
        assert_eq!(img[[15, 15, 0]], 0.0);
    }

    #[test]
    fn test_flat_color_of_equal_vertices_survives_truncation() {
        let vertices = array![[-1.0, -1.0, 0.0], [20.0, -1.0, 0.0], [-1.0, 20.0, 0.0]];
        for b in 0..=255u8 {
            let v = b as f32 / 255.0;
            let colors = array![[v], [v], [v]];
            let img = render(vertices.view(), colors.view(), &[[0, 1, 2]], 4, 4);
            assert_eq!(crate::types::unit_to_u8(img[[1, 1, 0]]), b, "byte {b}");
        }
    }

    #[test]
    fn test_render_nearer_triangle_wins() {
        // Two identical footprints, the second one nearer the camera.
        let vertices = array![
            [-1.0, -1.0, 0.0],
            [20.0, -1.0, 0.0],
            [-1.0, 20.0, 0.0],
            [-1.0, -1.0, 5.0],
            [20.0, -1.0, 5.0],
            [-1.0, 20.0, 5.0],
        ];
        let colors = array![[1.0], [1.0], [1.0], [2.0], [2.0], [2.0]];

        let far_first = render(vertices.view(), colors.view(), &[[0, 1, 2], [3, 4, 5]], 8, 8);
        let near_first = render(vertices.view(), colors.view(), &[[3, 4, 5], [0, 1, 2]], 8, 8);
        assert_eq!(far_first[[1, 1, 0]], 2.0);
        assert_eq!(near_first[[1, 1, 0]], 2.0);
    }

    #[test]
    fn test_render_skips_offscreen_and_bad_indices() {
        let vertices = array![[-50.0, -50.0, 0.0], [-40.0, -50.0, 0.0], [-50.0, -40.0, 0.0]];
        let colors = array![[1.0], [1.0], [1.0]];
        let img = render(vertices.view(), colors.view(), &[[0, 1, 2], [0, 1, 7]], 4, 4);
        assert!(img.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_depth_buffer_sentinel() {
        let vertices = array![[0.0, 0.0, 3.0], [2.0, 0.0, 3.0], [0.0, 2.0, 3.0]];
        let depth = depth_buffer(vertices.view(), &[[0, 1, 2]], 4, 4);
        assert_eq!(depth[[0, 0]], 3.0);
        assert_eq!(depth[[3, 3]], EMPTY_DEPTH);
    }
}
