//! Mesh extraction from the TSDF with naive surface nets.
//!
//! One vertex per cell whose corners change sign, placed at the mean of the
//! edge zero crossings; one quad per sign-changing voxel edge, joining the
//! four cells around it. Quads are wound so normals point into free space.

use std::collections::HashMap;

use nalgebra::Vector3;

use crate::error::FinalizeError;
use crate::finalization::CancelToken;
use crate::mapping::tsdf::{BRICK_SIZE, TsdfGrid};
use crate::mesh::TriangleMesh;

const CORNERS: [[i64; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [1, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [0, 1, 1],
    [1, 1, 1],
];

/// Corner index pairs forming the 12 cell edges.
const EDGES: [(usize, usize); 12] = [
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7),
    (0, 2),
    (1, 3),
    (4, 6),
    (5, 7),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Extract a triangle mesh of the zero level set.
pub fn extract(grid: &TsdfGrid, cancel: &CancelToken) -> Result<TriangleMesh, FinalizeError> {
    let res = grid.volume().resolution_m as f32;
    let mut vertex_of_cell: HashMap<[i64; 3], u32> = HashMap::new();
    let mut vertices: Vec<Vector3<f32>> = Vec::new();

    // Pass 1: one vertex per surface cell.
    for (key, _) in grid.bricks() {
        cancel.check()?;
        let base = key.map(|v| i64::from(v) * BRICK_SIZE as i64);
        for lz in 0..BRICK_SIZE as i64 {
            for ly in 0..BRICK_SIZE as i64 {
                for lx in 0..BRICK_SIZE as i64 {
                    let cell = [base[0] + lx, base[1] + ly, base[2] + lz];
                    if let Some(v) = cell_vertex(grid, cell) {
                        vertex_of_cell.insert(cell, vertices.len() as u32);
                        vertices.push(v * res);
                    }
                }
            }
        }
    }

    // Pass 2: quads around sign-changing edges.
    let mut triangles: Vec<[u32; 3]> = Vec::new();
    for (key, _) in grid.bricks() {
        cancel.check()?;
        let base = key.map(|v| i64::from(v) * BRICK_SIZE as i64);
        for lz in 0..BRICK_SIZE as i64 {
            for ly in 0..BRICK_SIZE as i64 {
                for lx in 0..BRICK_SIZE as i64 {
                    let voxel = [base[0] + lx, base[1] + ly, base[2] + lz];
                    let Some((d0, _)) = grid.sample(voxel) else {
                        continue;
                    };
                    for axis in 0..3 {
                        let mut next = voxel;
                        next[axis] += 1;
                        let Some((d1, _)) = grid.sample(next) else {
                            continue;
                        };
                        if (d0 < 0.0) == (d1 < 0.0) {
                            continue;
                        }
                        if let Some(quad) = edge_quad(&vertex_of_cell, voxel, axis) {
                            let [a, b, c, d] = if d1 >= 0.0 {
                                quad
                            } else {
                                [quad[3], quad[2], quad[1], quad[0]]
                            };
                            triangles.push([a, b, c]);
                            triangles.push([a, c, d]);
                        }
                    }
                }
            }
        }
    }

    if triangles.is_empty() {
        return Err(FinalizeError::EmptyVolume);
    }
    Ok(TriangleMesh::new(vertices, triangles))
}

/// Vertex (in voxel units, relative to voxel centers) for a cell, if the
/// surface passes through it and all eight corners were observed.
fn cell_vertex(grid: &TsdfGrid, cell: [i64; 3]) -> Option<Vector3<f32>> {
    let mut values = [0f32; 8];
    for (i, c) in CORNERS.iter().enumerate() {
        let (d, _) = grid.sample([cell[0] + c[0], cell[1] + c[1], cell[2] + c[2]])?;
        values[i] = d;
    }
    let negative = values.iter().filter(|d| **d < 0.0).count();
    if negative == 0 || negative == 8 {
        return None;
    }

    let mut sum = Vector3::<f32>::zeros();
    let mut n = 0;
    for &(a, b) in &EDGES {
        let (da, db) = (values[a], values[b]);
        if (da < 0.0) == (db < 0.0) {
            continue;
        }
        let t = da / (da - db);
        let pa = corner_position(a);
        let pb = corner_position(b);
        sum += pa + (pb - pa) * t;
        n += 1;
    }
    let local = sum / n as f32;
    // Voxel centers sit at index + 0.5.
    Some(Vector3::new(
        cell[0] as f32 + 0.5 + local.x,
        cell[1] as f32 + 0.5 + local.y,
        cell[2] as f32 + 0.5 + local.z,
    ))
}

#[inline]
fn corner_position(i: usize) -> Vector3<f32> {
    let c = CORNERS[i];
    Vector3::new(c[0] as f32, c[1] as f32, c[2] as f32)
}

/// The four cells sharing the edge from `voxel` along `axis`, in
/// counter-clockwise order seen from the +axis side.
fn edge_quad(cells: &HashMap<[i64; 3], u32>, voxel: [i64; 3], axis: usize) -> Option<[u32; 4]> {
    let b = (axis + 1) % 3;
    let c = (axis + 2) % 3;
    let offsets = [(-1, -1), (0, -1), (0, 0), (-1, 0)];
    let mut quad = [0u32; 4];
    for (slot, (ob, oc)) in offsets.iter().enumerate() {
        let mut cell = voxel;
        cell[b] += ob;
        cell[c] += oc;
        quad[slot] = *cells.get(&cell)?;
    }
    Some(quad)
}
