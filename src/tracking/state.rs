//! Tracking quality and the per-frame pose record.

use crate::geometry::SE3;

/// Quality tag attached to every pose the tracker produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingQuality {
    /// Pose refined against the previous frame.
    Good,
    /// The device moved further than the tracker can follow in one frame.
    PoorExcessiveMotion,
    /// Not enough geometry overlapped with the previous frame.
    PoorLowFeatures,
    /// No usable depth or the solver failed.
    NotAvailable,
}

impl TrackingQuality {
    /// Only `Good` poses are fused into the volume.
    pub fn is_good(self) -> bool {
        matches!(self, Self::Good)
    }
}

impl Default for TrackingQuality {
    fn default() -> Self {
        Self::NotAvailable
    }
}

/// Pose produced for one accepted frame. Superseded by the next frame's pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerPose {
    /// Camera to world (T_wc).
    pub pose: SE3,
    /// Frame timestamp in seconds.
    pub timestamp: f64,
    pub quality: TrackingQuality,
}

impl TrackerPose {
    pub fn new(pose: SE3, timestamp: f64, quality: TrackingQuality) -> Self {
        Self {
            pose,
            timestamp,
            quality,
        }
    }
}
