//! Volume placement while in pose initialization.
//!
//! The camera is placed at the center of the volume, oriented so that image
//! down follows the latest gravity sample. Each depth frame produces a
//! feedback buffer telling the display which pixels fall inside the volume.

use nalgebra::{UnitQuaternion, Vector3};

use crate::geometry::SE3;
use crate::mapping::ScanVolume;
use crate::sensor::DepthFrame;

/// Per-pixel inside-volume mask for the display layer.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeFeedback {
    pub width: usize,
    pub height: usize,
    /// Row-major; false for invalid depth.
    pub inside: Vec<bool>,
}

impl VolumeFeedback {
    pub fn compute(depth: &DepthFrame, camera_pose: &SE3, volume: &ScanVolume) -> Self {
        let (width, height) = (depth.width(), depth.height());
        let mut inside = Vec::with_capacity(width * height);
        for v in 0..height {
            for u in 0..width {
                let hit = depth
                    .point_at(u, v)
                    .is_some_and(|p_c| volume.contains(&camera_pose.transform_point(&p_c)));
                inside.push(hit);
            }
        }
        Self { width, height, inside }
    }

    pub fn is_inside(&self, u: usize, v: usize) -> bool {
        u < self.width && self.inside.get(v * self.width + u).copied().unwrap_or(false)
    }

    pub fn inside_fraction(&self) -> f64 {
        if self.inside.is_empty() {
            return 0.0;
        }
        self.inside.iter().filter(|b| **b).count() as f64 / self.inside.len() as f64
    }
}

/// Estimates the initial camera pose relative to the volume.
#[derive(Debug, Clone, Default)]
pub struct PlacementEstimator {
    /// Latest gravity direction in the camera frame.
    gravity: Option<Vector3<f64>>,
}

impl PlacementEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a gravity sample (camera frame). Degenerate samples are ignored.
    pub fn submit_gravity(&mut self, gravity: Vector3<f64>) -> bool {
        if gravity.iter().all(|v| v.is_finite()) && gravity.norm() > 1e-6 {
            self.gravity = Some(gravity);
            true
        } else {
            false
        }
    }

    pub fn has_gravity(&self) -> bool {
        self.gravity.is_some()
    }

    /// Camera-to-world pose at the volume center. Identity orientation until
    /// gravity is known.
    pub fn camera_pose(&self, volume: &ScanVolume) -> SE3 {
        let rotation = self
            .gravity
            .and_then(|g| SE3::gravity_aligned(&g, &Vector3::z()))
            // The aligned frame is expressed in camera coordinates; world is its inverse.
            .map(|q| q.inverse())
            .unwrap_or_else(UnitQuaternion::identity);
        SE3::new(rotation, volume.center())
    }

    /// Placement pose and inside-volume feedback for a depth frame.
    pub fn estimate(&self, depth: &DepthFrame, volume: &ScanVolume) -> (SE3, VolumeFeedback) {
        let pose = self.camera_pose(volume);
        let feedback = VolumeFeedback::compute(depth, &pose, volume);
        (pose, feedback)
    }
}
