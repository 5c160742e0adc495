//! Scanning volume: extent and voxel resolution.
//!
//! The volume is an axis-aligned box in world coordinates spanning
//! `[0, size]` on each axis. Y points down (gravity aligned).

use nalgebra::Vector3;

use crate::config::CaptureSessionConfig;

/// Smallest and largest allowed extent per axis, meters.
pub const MIN_VOLUME_AXIS_M: f64 = 0.1;
pub const MAX_VOLUME_AXIS_M: f64 = 10.0;

/// Extent and resolution of the region being fused.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanVolume {
    pub size_m: Vector3<f64>,
    /// Meters per voxel.
    pub resolution_m: f64,
}

impl ScanVolume {
    /// A volume that has not been sized yet. Scanning cannot start from it.
    pub fn unconfirmed() -> Self {
        Self {
            size_m: Vector3::repeat(f64::NAN),
            resolution_m: f64::NAN,
        }
    }

    /// The initial volume from the session configuration.
    pub fn initial(config: &CaptureSessionConfig) -> Self {
        let [x, y, z] = config.initial_volume_size_m;
        Self::sized(Vector3::new(x, y, z), None, config)
    }

    /// Apply the sizing rules: each axis clamped to
    /// [`MIN_VOLUME_AXIS_M`, `MAX_VOLUME_AXIS_M`], the vertical axis at least
    /// the configured minimum. Without an explicit resolution the initial
    /// resolution is scaled with the width to keep the voxel count steady.
    pub fn sized(requested: Vector3<f64>, resolution_m: Option<f64>, config: &CaptureSessionConfig) -> Self {
        let mut size_m = requested.map(|v| v.clamp(MIN_VOLUME_AXIS_M, MAX_VOLUME_AXIS_M));
        size_m.y = size_m.y.max(config.min_vertical_volume_size_m);

        let resolution_m = resolution_m.unwrap_or_else(|| {
            config.initial_volume_resolution_m * (size_m.x / config.initial_volume_size_m[0])
        });
        Self {
            size_m,
            resolution_m,
        }
    }

    /// Sized with finite, positive dimensions.
    pub fn is_confirmed(&self) -> bool {
        self.size_m.iter().all(|v| v.is_finite() && *v > 0.0)
            && self.resolution_m.is_finite()
            && self.resolution_m > 0.0
    }

    /// Voxel counts per axis.
    pub fn voxel_dims(&self) -> [usize; 3] {
        if !self.is_confirmed() {
            return [0; 3];
        }
        [0, 1, 2].map(|i| ((self.size_m[i] / self.resolution_m).round() as usize).max(1))
    }

    pub fn center(&self) -> Vector3<f64> {
        self.size_m / 2.0
    }

    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (0..3).all(|i| p[i] >= 0.0 && p[i] <= self.size_m[i])
    }
}
