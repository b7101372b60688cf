//! Per-vertex visibility and the UV-space coverage mask derived from it.

use crate::raster;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// How far behind the depth buffer a vertex may sit and still count as visible.
const DEPTH_TOLERANCE: f32 = 2.0;

/// Passes spreading visibility to every vertex of a triangle that has one visible vertex.
const DILATION_PASSES: usize = 2;

/// Mark each vertex visible (1.0) or occluded/off-screen (0.0).
///
/// A vertex is visible when it lands inside the `height × width` frame and its
/// depth is within [`DEPTH_TOLERANCE`] of the rendered surface at its nearest
/// pixel. Visibility is then grown across triangles to close pinholes.
pub fn vertex_visibility(
    vertices: ArrayView2<f32>,
    triangles: &[[usize; 3]],
    height: usize,
    width: usize,
) -> Array1<f32> {
    let n = vertices.nrows();
    let mut visible = vec![false; n];
    if height == 0 || width == 0 {
        return Array1::zeros(n);
    }

    let depth = raster::depth_buffer(vertices, triangles, height, width);
    let mut claimed = Array2::<f32>::from_elem((height, width), -99_999.0);

    for (i, vertex) in vertices.outer_iter().enumerate() {
        let (x, y) = (vertex[0], vertex[1]);
        let z = if vertex.len() > 2 { vertex[2] } else { 0.0 };
        if !(x.is_finite() && y.is_finite() && z.is_finite()) {
            continue;
        }
        if x.floor() < 0.0
            || x.ceil() > (width - 1) as f32
            || y.floor() < 0.0
            || y.ceil() > (height - 1) as f32
        {
            continue;
        }

        let px = x.round() as usize;
        let py = y.round() as usize;
        if z < claimed[[py, px]] {
            continue;
        }
        if z > depth[[py, px]] - DEPTH_TOLERANCE {
            visible[i] = true;
            claimed[[py, px]] = z;
        }
    }

    for _ in 0..DILATION_PASSES {
        let seeds: Vec<[usize; 3]> = triangles
            .iter()
            .filter(|tri| tri.iter().all(|&i| i < n) && tri.iter().any(|&i| visible[i]))
            .copied()
            .collect();
        for tri in seeds {
            for i in tri {
                visible[i] = true;
            }
        }
    }

    visible.into_iter().map(|v| if v { 1.0 } else { 0.0 }).collect()
}

/// Rasterise vertex visibility into UV space and clean it up morphologically.
///
/// Returns a `resolution × resolution` mask of 0.0 / 1.0.
pub fn uv_mask(
    visibility: ArrayView1<f32>,
    triangles: &[[usize; 3]],
    uv_coords: ArrayView2<f32>,
    resolution: usize,
) -> Array2<f32> {
    let weights = visibility.insert_axis(Axis(1));
    let rendered = raster::render(uv_coords, weights, triangles, resolution, resolution);
    let mut mask: Array2<bool> = rendered.index_axis(Axis(2), 0).mapv(|v| v > 0.0);

    mask = binary_closing(&mask);
    mask = binary_erosion_square(&mask, 4);
    mask = binary_closing(&mask);
    for _ in 0..3 {
        mask = binary_erosion_square(&mask, 4);
    }

    mask.mapv(|v| if v { 1.0 } else { 0.0 })
}

const CROSS: [(i64, i64); 5] = [(0, 0), (-1, 0), (1, 0), (0, -1), (0, 1)];

fn at(mask: &Array2<bool>, y: i64, x: i64) -> bool {
    let (h, w) = mask.dim();
    y >= 0 && x >= 0 && (y as usize) < h && (x as usize) < w && mask[[y as usize, x as usize]]
}

fn dilate_cross(mask: &Array2<bool>) -> Array2<bool> {
    Array2::from_shape_fn(mask.dim(), |(y, x)| {
        CROSS.iter().any(|&(dy, dx)| at(mask, y as i64 + dy, x as i64 + dx))
    })
}

fn erode_cross(mask: &Array2<bool>) -> Array2<bool> {
    Array2::from_shape_fn(mask.dim(), |(y, x)| {
        CROSS.iter().all(|&(dy, dx)| at(mask, y as i64 + dy, x as i64 + dx))
    })
}

/// Dilation followed by erosion with a 3×3 cross; pixels beyond the border read as unset.
pub fn binary_closing(mask: &Array2<bool>) -> Array2<bool> {
    erode_cross(&dilate_cross(mask))
}

/// Erosion with a `size × size` square anchored at `size / 2`.
pub fn binary_erosion_square(mask: &Array2<bool>, size: usize) -> Array2<bool> {
    let origin = (size / 2) as i64;
    let size = size as i64;
    Array2::from_shape_fn(mask.dim(), |(y, x)| {
        (0..size).all(|dy| {
            (0..size).all(|dx| at(mask, y as i64 + dy - origin, x as i64 + dx - origin))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_offscreen_vertex_is_invisible() {
        let vertices = array![[1.0, 1.0, 0.0], [30.0, 1.0, 0.0], [-3.0, 2.0, 0.0]];
        let vis = vertex_visibility(vertices.view(), &[], 10, 10);
        assert_eq!(vis.to_vec(), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_occluded_vertex_is_invisible() {
        // A near triangle covering the canvas, and a lone vertex far behind it.
        let vertices = array![
            [-1.0, -1.0, 10.0],
            [30.0, -1.0, 10.0],
            [-1.0, 30.0, 10.0],
            [4.0, 4.0, 0.0],
        ];
        let vis = vertex_visibility(vertices.view(), &[[0, 1, 2]], 10, 10);
        assert_eq!(vis[3], 0.0);
    }

    #[test]
    fn test_visibility_spreads_through_triangles() {
        // Vertex 0 visible; 1 and 2 off-screen but share a triangle with it.
        let vertices = array![[2.0, 2.0, 0.0], [50.0, 2.0, 0.0], [2.0, 50.0, 0.0], [-9.0, -9.0, 0.0]];
        let vis = vertex_visibility(vertices.view(), &[[0, 1, 2]], 8, 8);
        assert_eq!(vis.to_vec(), vec![1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_uv_mask_zero_for_invisible_region() {
        let uv = array![[-1.0, -1.0, 0.0], [40.0, -1.0, 0.0], [-1.0, 40.0, 0.0]];
        let hidden = array![0.0f32, 0.0, 0.0];
        let mask = uv_mask(hidden.view(), &[[0, 1, 2]], uv.view(), 16);
        assert!(mask.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_uv_mask_full_coverage_erodes_border() {
        // A triangle covering everything; erosion eats into the frame edge.
        let uv = array![[-1.0, -1.0, 0.0], [100.0, -1.0, 0.0], [-1.0, 100.0, 0.0]];
        let shown = array![1.0f32, 1.0, 1.0];
        let mask = uv_mask(shown.view(), &[[0, 1, 2]], uv.view(), 32);
        assert_eq!(mask[[16, 16]], 1.0);
        assert_eq!(mask[[0, 0]], 0.0);
        assert_eq!(mask[[31, 16]], 0.0);
    }

    #[test]
    fn test_erosion_square_shrinks_block() {
        let mut mask = Array2::from_elem((12, 12), false);
        for y in 2..10 {
            for x in 2..10 {
                mask[[y, x]] = true;
            }
        }
        let eroded = binary_erosion_square(&mask, 4);
        // offsets -2..=1: a pixel survives if (y-2..=y+1) stays within 2..10
        assert!(eroded[[4, 4]]);
        assert!(eroded[[8, 8]]);
        assert!(!eroded[[3, 5]]);
        assert!(!eroded[[9, 5]]);
    }

    #[test]
    fn test_closing_fills_pinhole() {
        let mut mask = Array2::from_elem((7, 7), true);
        mask[[3, 3]] = false;
        let closed = binary_closing(&mask);
        assert!(closed[[3, 3]]);
        // border pixels fail the cross erosion
        assert!(!closed[[0, 3]]);
    }
}
