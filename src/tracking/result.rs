//! Per-frame tracker output and diagnostics.

use crate::geometry::SE3;
use crate::tracking::TrackingQuality;

/// What the tracker decided for a single depth frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingOutcome {
    pub quality: TrackingQuality,
    /// Refined pose on success; the prior otherwise.
    pub pose: SE3,
    pub metrics: TrackingMetrics,
}

impl TrackingOutcome {
    /// Failure outcome that holds the pose at the prior.
    pub fn held(quality: TrackingQuality, prior: &SE3, metrics: TrackingMetrics) -> Self {
        Self {
            quality,
            pose: *prior,
            metrics,
        }
    }
}

/// Scalar metrics useful for debugging tracking quality.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackingMetrics {
    pub n_valid_pixels: usize,
    pub n_correspondences: usize,
    pub iterations: usize,
    /// RMS point-to-plane residual of the final iteration (meters).
    pub rms_residual_m: f64,
    pub delta_translation_m: f64,
    pub delta_rotation_deg: f64,
}
