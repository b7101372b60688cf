//! Mesh topology files shipped alongside the network.
//!
//! The files are plain whitespace-separated numbers. Integer tables are
//! often saved as floats (`1.234500000000000000e+04`), so every value is
//! parsed as `f64` and checked for integrality where an index is expected.

use crate::PrnError;
use facewarp_core::{MeshTopology, VertexSet};
use ndarray::Array2;
use std::path::Path;

/// Keypoint texel coordinates, one `(col, row)` per landmark.
pub type KeypointIndex = Vec<(usize, usize)>;

fn uv_error(file: &str, reason: impl Into<String>) -> PrnError {
    PrnError::UvData {
        file: file.to_string(),
        reason: reason.into(),
    }
}

/// Parse a whitespace table into rows of numbers. Blank lines are skipped.
fn parse_table(file: &str, src: &str) -> Result<Vec<Vec<f64>>, PrnError> {
    src.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            line.split_whitespace()
                .map(|tok| {
                    tok.parse::<f64>()
                        .map_err(|e| uv_error(file, format!("line {}: {tok:?}: {e}", n + 1)))
                })
                .collect()
        })
        .collect()
}

fn to_index(file: &str, v: f64) -> Result<usize, PrnError> {
    if v < 0.0 || v.fract() != 0.0 || !v.is_finite() {
        return Err(uv_error(file, format!("{v} is not a valid index")));
    }
    Ok(v as usize)
}

/// Flat texel indices into a `resolution²` map, one per line or all on one line.
pub fn parse_face_indices(file: &str, src: &str, resolution: usize) -> Result<Vec<usize>, PrnError> {
    let limit = resolution * resolution;
    let indices = parse_table(file, src)?
        .into_iter()
        .flatten()
        .map(|v| to_index(file, v))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(&bad) = indices.iter().find(|&&k| k >= limit) {
        return Err(uv_error(file, format!("index {bad} outside {resolution}×{resolution} map")));
    }
    if indices.is_empty() {
        return Err(uv_error(file, "no indices"));
    }
    Ok(indices)
}

pub fn parse_triangles(file: &str, src: &str, vertex_count: usize) -> Result<Vec<[usize; 3]>, PrnError> {
    parse_table(file, src)?
        .into_iter()
        .enumerate()
        .map(|(n, row)| {
            if row.len() != 3 {
                return Err(uv_error(file, format!("row {n} has {} columns, expected 3", row.len())));
            }
            let tri = [
                to_index(file, row[0])?,
                to_index(file, row[1])?,
                to_index(file, row[2])?,
            ];
            if tri.iter().any(|&i| i >= vertex_count) {
                return Err(uv_error(file, format!("row {n} references a vertex ≥ {vertex_count}")));
            }
            Ok(tri)
        })
        .collect()
}

/// Keypoint table: first row holds texel columns, second row texel rows.
pub fn parse_keypoints(file: &str, src: &str, resolution: usize) -> Result<KeypointIndex, PrnError> {
    let rows = parse_table(file, src)?;
    let [cols, rws] = rows.as_slice() else {
        return Err(uv_error(file, format!("expected 2 rows, got {}", rows.len())));
    };
    if cols.len() != rws.len() {
        return Err(uv_error(file, "row lengths differ"));
    }
    cols.iter()
        .zip(rws)
        .map(|(&c, &r)| {
            let (c, r) = (to_index(file, c)?, to_index(file, r)?);
            if c >= resolution || r >= resolution {
                return Err(uv_error(file, format!("keypoint ({c}, {r}) outside map")));
            }
            Ok((c, r))
        })
        .collect()
}

pub fn parse_vertices(file: &str, src: &str, vertex_count: usize) -> Result<VertexSet, PrnError> {
    let rows = parse_table(file, src)?;
    if rows.len() != vertex_count {
        return Err(uv_error(
            file,
            format!("{} vertices, mesh has {vertex_count}", rows.len()),
        ));
    }
    let mut out = Array2::<f32>::zeros((vertex_count, 3));
    for (i, row) in rows.iter().enumerate() {
        if row.len() != 3 {
            return Err(uv_error(file, format!("row {i} has {} columns, expected 3", row.len())));
        }
        for (c, &v) in row.iter().enumerate() {
            out[[i, c]] = v as f32;
        }
    }
    Ok(out)
}

/// `(col, row, 0)` texel coordinates for each flat face index.
pub fn uv_coords(face_indices: &[usize], resolution: usize) -> Array2<f32> {
    let mut uv = Array2::<f32>::zeros((face_indices.len(), 3));
    for (i, &k) in face_indices.iter().enumerate() {
        uv[[i, 0]] = (k % resolution) as f32;
        uv[[i, 1]] = (k / resolution) as f32;
    }
    uv
}

fn read(dir: &Path, file: &str) -> Result<String, PrnError> {
    std::fs::read_to_string(dir.join(file)).map_err(|e| uv_error(file, e.to_string()))
}

/// Load topology and keypoint index from a model directory.
pub fn load(
    dir: &Path,
    files: &crate::manifest::DataFiles,
    resolution: usize,
) -> Result<(MeshTopology, KeypointIndex), PrnError> {
    let face_ind = parse_face_indices(&files.face_ind, &read(dir, &files.face_ind)?, resolution)?;
    let n = face_ind.len();
    let triangles = parse_triangles(&files.triangles, &read(dir, &files.triangles)?, n)?;
    let keypoints = parse_keypoints(&files.uv_kpt_ind, &read(dir, &files.uv_kpt_ind)?, resolution)?;

    let canonical_vertices = match &files.canonical_vertices {
        Some(name) if dir.join(name).exists() => Some(parse_vertices(name, &read(dir, name)?, n)?),
        Some(name) => {
            tracing::warn!(file = %name, "canonical vertices missing; pose estimation disabled");
            None
        }
        None => None,
    };

    tracing::info!(
        vertices = n,
        triangles = triangles.len(),
        keypoints = keypoints.len(),
        pose = canonical_vertices.is_some(),
        "loaded UV data"
    );

    let topology = MeshTopology {
        triangles,
        uv_coords: uv_coords(&face_ind, resolution),
        resolution,
        canonical_vertices,
    };
    Ok((topology, keypoints))
}
