//! Image resampling: position-map remapping and area-averaging resize.

use crate::types::PositionMap;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

/// Sampling filter used by [`remap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Round the source coordinate to the nearest pixel.
    Nearest,
    /// Blend the four surrounding pixels.
    Bilinear,
}

/// Sample `image` at the `(x, y)` coordinates stored in the first two channels
/// of `map`, producing an image with the map's height and width.
///
/// Samples falling outside the source read as 0 (constant black border).
pub fn remap(image: ArrayView3<f32>, map: &PositionMap, interpolation: Interpolation) -> Array3<f32> {
    let (src_h, src_w, channels) = image.dim();
    let (out_h, out_w, _) = map.dim();
    let mut out = Array3::<f32>::zeros((out_h, out_w, channels));

    let inside = |x: i64, y: i64| x >= 0 && y >= 0 && (x as usize) < src_w && (y as usize) < src_h;

    for oy in 0..out_h {
        for ox in 0..out_w {
            let sx = map[[oy, ox, 0]];
            let sy = map[[oy, ox, 1]];
            if !sx.is_finite() || !sy.is_finite() {
                continue;
            }

            match interpolation {
                Interpolation::Nearest => {
                    let x = sx.round() as i64;
                    let y = sy.round() as i64;
                    if inside(x, y) {
                        for c in 0..channels {
                            out[[oy, ox, c]] = image[[y as usize, x as usize, c]];
                        }
                    }
                }
                Interpolation::Bilinear => {
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
                        if weight == 0.0 || !inside(x, y) {
                            continue;
                        }
                        for c in 0..channels {
                            out[[oy, ox, c]] += image[[y as usize, x as usize, c]] * weight;
                        }
                    }
                }
            }
        }
    }

    out
}

/// Source indices and overlap weights contributing to each destination cell.
fn area_weights(src_len: usize, dst_len: usize) -> Vec<Vec<(usize, f32)>> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let start = d as f64 * scale;
            let end = (d + 1) as f64 * scale;
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).min(src_len);
            (first..last)
                .filter_map(|s| {
                    let overlap = (end.min((s + 1) as f64) - start.max(s as f64)) / scale;
                    (overlap > 0.0).then_some((s, overlap as f32))
                })
                .collect()
        })
        .collect()
}

/// Resize by averaging the source area covered by each destination pixel.
///
/// Preserves the mean of the image; an identity-sized resize returns the
/// input unchanged.
pub fn resize_area(image: ArrayView3<f32>, out_h: usize, out_w: usize) -> Array3<f32> {
    let (src_h, src_w, channels) = image.dim();
    if (src_h, src_w) == (out_h, out_w) {
        return image.to_owned();
    }
    let mut out = Array3::<f32>::zeros((out_h, out_w, channels));
    if src_h == 0 || src_w == 0 {
        return out;
    }

    let rows = area_weights(src_h, out_h);
    let cols = area_weights(src_w, out_w);

    for (oy, row_taps) in rows.iter().enumerate() {
        for (ox, col_taps) in cols.iter().enumerate() {
            for &(sy, wy) in row_taps {
                for &(sx, wx) in col_taps {
                    let weight = wy * wx;
                    for c in 0..channels {
                        out[[oy, ox, c]] += image[[sy, sx, c]] * weight;
                    }
                }
            }
        }
    }

    out
}

/// Single-channel [`resize_area`].
pub fn resize_area_2d(image: ArrayView2<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
    resize_area(image.insert_axis(Axis(2)), out_h, out_w).remove_axis(Axis(2))
}
