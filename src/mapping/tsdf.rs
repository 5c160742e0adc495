//! Sparse truncated signed distance grid.
//!
//! Voxels are allocated in 8×8×8 bricks on first touch, so memory follows the
//! observed surface rather than the full volume. Distances are stored
//! normalized by the truncation band: +1 is free space in front of the
//! surface, -1 is behind it.

use std::collections::HashMap;

use nalgebra::Vector3;

use crate::config::MapperSettings;
use crate::geometry::SE3;
use crate::mapping::ScanVolume;
use crate::sensor::DepthFrame;

pub const BRICK_SIZE: usize = 8;
const BRICK_VOXELS: usize = BRICK_SIZE * BRICK_SIZE * BRICK_SIZE;

/// Brick coordinate (voxel index / `BRICK_SIZE`).
pub type BrickKey = [i32; 3];

#[derive(Clone)]
pub struct Brick {
    pub tsdf: [f32; BRICK_VOXELS],
    pub weight: [f32; BRICK_VOXELS],
}

impl Brick {
    fn new() -> Self {
        Self {
            tsdf: [1.0; BRICK_VOXELS],
            weight: [0.0; BRICK_VOXELS],
        }
    }

    #[inline]
    fn index(local: [usize; 3]) -> usize {
        (local[2] * BRICK_SIZE + local[1]) * BRICK_SIZE + local[0]
    }
}

/// Sparse TSDF bounded by a `ScanVolume`.
pub struct TsdfGrid {
    volume: ScanVolume,
    dims: [usize; 3],
    truncation_m: f32,
    max_weight: f32,
    bricks: HashMap<BrickKey, Box<Brick>>,
}

impl TsdfGrid {
    pub fn new(volume: ScanVolume, settings: &MapperSettings) -> Self {
        Self {
            volume,
            dims: volume.voxel_dims(),
            truncation_m: settings.truncation_voxels * volume.resolution_m as f32,
            max_weight: settings.max_weight,
            bricks: HashMap::new(),
        }
    }

    pub fn volume(&self) -> &ScanVolume {
        &self.volume
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn num_bricks(&self) -> usize {
        self.bricks.len()
    }

    pub fn bricks(&self) -> impl Iterator<Item = (&BrickKey, &Brick)> {
        self.bricks.iter().map(|(k, b)| (k, b.as_ref()))
    }

    /// World position of a voxel center.
    #[inline]
    pub fn voxel_center(&self, idx: [i64; 3]) -> Vector3<f64> {
        Vector3::new(idx[0] as f64 + 0.5, idx[1] as f64 + 0.5, idx[2] as f64 + 0.5) * self.volume.resolution_m
    }

    #[inline]
    fn voxel_of(&self, p: &Vector3<f64>) -> Option<[i64; 3]> {
        let res = self.volume.resolution_m;
        let idx = [0, 1, 2].map(|i| (p[i] / res).floor() as i64);
        let inside = (0..3).all(|i| idx[i] >= 0 && (idx[i] as usize) < self.dims[i]);
        inside.then_some(idx)
    }

    #[inline]
    fn split(idx: [i64; 3]) -> (BrickKey, [usize; 3]) {
        let b = BRICK_SIZE as i64;
        (
            idx.map(|v| v.div_euclid(b) as i32),
            idx.map(|v| v.rem_euclid(b) as usize),
        )
    }

    /// Normalized distance and weight at a voxel; `None` if never observed.
    #[inline]
    pub fn sample(&self, idx: [i64; 3]) -> Option<(f32, f32)> {
        let (key, local) = Self::split(idx);
        let brick = self.bricks.get(&key)?;
        let i = Brick::index(local);
        let w = brick.weight[i];
        (w > 0.0).then(|| (brick.tsdf[i], w))
    }

    /// Fuse one depth frame seen from `pose` (T_wc).
    ///
    /// Each sampled pixel marches its ray through the truncation band around
    /// the measured depth; voxels along the way get a projective distance
    /// update. Returns the number of voxel updates.
    pub fn integrate(&mut self, depth: &DepthFrame, pose: &SE3, settings: &MapperSettings) -> usize {
        let k = depth.intrinsics;
        let stride = settings.integration_stride.max(1);
        let step = (self.volume.resolution_m * 0.5).max(1e-4);
        let trunc = f64::from(self.truncation_m);
        let pose_inv = pose.inverse();
        let origin = pose.translation;
        let mut updates = 0;

        for v in (0..k.height).step_by(stride) {
            for u in (0..k.width).step_by(stride) {
                let Some(d) = depth.at(u, v) else {
                    continue;
                };
                if d > settings.max_depth_m {
                    continue;
                }
                let d = f64::from(d);
                // Ray with unit depth, so `origin + ray * t` lies at depth t.
                let ray = pose.rotate_vector(&k.unproject(u as f64, v as f64, 1.0));

                let mut t = (d - trunc).max(step);
                while t <= d + trunc {
                    let p = origin + ray * t;
                    t += step;
                    let Some(idx) = self.voxel_of(&p) else {
                        continue;
                    };
                    let center_depth = pose_inv.transform_point(&self.voxel_center(idx)).z;
                    let sdf = d - center_depth;
                    if sdf < -trunc {
                        continue;
                    }
                    let value = (sdf / trunc).clamp(-1.0, 1.0) as f32;
                    self.update_voxel(idx, value);
                    updates += 1;
                }
            }
        }
        updates
    }

    fn update_voxel(&mut self, idx: [i64; 3], value: f32) {
        let (key, local) = Self::split(idx);
        let brick = self.bricks.entry(key).or_insert_with(|| Box::new(Brick::new()));
        let i = Brick::index(local);
        let w = brick.weight[i];
        brick.tsdf[i] = (brick.tsdf[i] * w + value) / (w + 1.0);
        brick.weight[i] = (w + 1.0).min(self.max_weight);
    }
}
