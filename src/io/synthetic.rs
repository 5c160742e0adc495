//! Synthetic room renderer.
//!
//! Ray casts an axis-aligned room (viewed from the inside) plus box-shaped
//! furniture, producing depth and color frames for any camera pose. Used by the
//! demo binary and by tracker/mapper tests.

use std::sync::Arc;

use nalgebra::Vector3;

use crate::geometry::SE3;
use crate::sensor::{CameraIntrinsics, ColorFrame, ColorImage, DepthFrame, FramePair};

/// Axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl Aabb {
    pub fn new(min: Vector3<f64>, max: Vector3<f64>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// Slab test; returns (t_enter, t_exit) with t_exit > max(t_enter, 0).
    fn intersect(&self, origin: &Vector3<f64>, dir: &Vector3<f64>) -> Option<(f64, f64)> {
        let mut t_min = f64::NEG_INFINITY;
        let mut t_max = f64::INFINITY;
        for i in 0..3 {
            if dir[i].abs() < 1e-12 {
                if origin[i] < self.min[i] || origin[i] > self.max[i] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dir[i];
            let (mut t0, mut t1) = ((self.min[i] - origin[i]) * inv, (self.max[i] - origin[i]) * inv);
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
        }
        (t_max > t_min.max(0.0)).then_some((t_min, t_max))
    }
}

/// A closed room with furniture.
#[derive(Debug, Clone)]
pub struct SyntheticRoom {
    pub walls: Aabb,
    pub furniture: Vec<Aabb>,
    pub intrinsics: CameraIntrinsics,
}

impl SyntheticRoom {
    /// 5 × 3 × 5 m room centered on the origin (floor at y = +1.5, Y down),
    /// with a table, a cabinet and a sofa.
    pub fn furnished(intrinsics: CameraIntrinsics) -> Self {
        let walls = Aabb::new(Vector3::new(-2.5, -1.5, -2.5), Vector3::new(2.5, 1.5, 2.5));
        let furniture = vec![
            Aabb::new(Vector3::new(0.6, 0.75, 0.8), Vector3::new(1.6, 1.5, 1.6)),
            Aabb::new(Vector3::new(-2.5, -0.5, -1.2), Vector3::new(-1.9, 1.5, 0.2)),
            Aabb::new(Vector3::new(-1.0, 0.9, -2.5), Vector3::new(1.2, 1.5, -1.7)),
        ];
        Self {
            walls,
            furniture,
            intrinsics,
        }
    }

    /// Distance along `dir` to the first surface.
    fn cast(&self, origin: &Vector3<f64>, dir: &Vector3<f64>) -> Option<(f64, usize)> {
        let (_, t_wall) = self.walls.intersect(origin, dir)?;
        let mut best = (t_wall, 0usize);
        for (i, b) in self.furniture.iter().enumerate() {
            if let Some((t_enter, _)) = b.intersect(origin, dir) {
                if t_enter > 1e-6 && t_enter < best.0 {
                    best = (t_enter, i + 1);
                }
            }
        }
        Some(best)
    }

    /// Render depth as seen from `pose` (T_wc).
    pub fn render_depth(&self, pose: &SE3) -> DepthFrame {
        let k = self.intrinsics;
        let mut depth = vec![0.0f32; k.width * k.height];
        for v in 0..k.height {
            for u in 0..k.width {
                // Unnormalized ray with z = 1 so t equals depth.
                let ray_cam = k.unproject(u as f64, v as f64, 1.0);
                let ray_world = pose.rotate_vector(&ray_cam);
                if let Some((t, _)) = self.cast(&pose.translation, &ray_world) {
                    depth[v * k.width + u] = t as f32;
                }
            }
        }
        DepthFrame::new(k, depth)
    }

    /// Render color as seen from `pose`: each surface gets a base color
    /// modulated by a 25 cm checker pattern.
    pub fn render_color(&self, pose: &SE3) -> ColorFrame {
        let k = self.intrinsics;
        let mut pixels = vec![[0u8; 3]; k.width * k.height];
        for v in 0..k.height {
            for u in 0..k.width {
                let ray_world = pose.rotate_vector(&k.unproject(u as f64, v as f64, 1.0));
                if let Some((t, surface)) = self.cast(&pose.translation, &ray_world) {
                    let hit = pose.translation + ray_world * t;
                    pixels[v * k.width + u] = surface_color(surface, &hit);
                }
            }
        }
        ColorFrame {
            intrinsics: k,
            image: Arc::new(ColorImage::new(k.width, k.height, pixels)),
        }
    }

    pub fn frame_pair(&self, pose: &SE3, timestamp: f64) -> FramePair {
        FramePair::new(timestamp, self.render_depth(pose), Some(self.render_color(pose)))
    }
}

fn surface_color(surface: usize, hit: &Vector3<f64>) -> [u8; 3] {
    const BASE: [[u8; 3]; 4] = [[200, 190, 170], [150, 90, 60], [90, 110, 160], [120, 160, 90]];
    let base = BASE[surface % BASE.len()];
    let cell = (hit.x / 0.25).floor() + (hit.y / 0.25).floor() + (hit.z / 0.25).floor();
    if (cell as i64).rem_euclid(2) == 0 {
        base
    } else {
        [base[0] / 2, base[1] / 2, base[2] / 2]
    }
}
