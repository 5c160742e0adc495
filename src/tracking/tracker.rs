//! Pose tracker: refines the device pose for each depth frame.
//!
//! The default implementation tracks frame-to-frame with point-to-plane ICP.
//! A failed frame never moves the pose; the reference frame is kept so the
//! next frame is aligned against the last good one.

use tracing::trace;

use crate::config::TrackerSettings;
use crate::geometry::SE3;
use crate::sensor::DepthFrame;
use crate::tracking::TrackingQuality;
use crate::tracking::icp::{self, IcpFailure, VertexMap};
use crate::tracking::result::{TrackingMetrics, TrackingOutcome};

/// Produces a refined pose and a quality tag from a depth frame and a prior.
pub trait PoseTracker: Send {
    fn track(&mut self, depth: &DepthFrame, prior: &SE3) -> TrackingOutcome;

    /// Forget all history and re-seed at `pose`.
    fn reset(&mut self, pose: &SE3);
}

/// Frame-to-frame ICP tracker.
pub struct IcpTracker {
    settings: TrackerSettings,
    /// Last well-tracked frame and its pose.
    reference: Option<(VertexMap, SE3)>,
}

impl IcpTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            reference: None,
        }
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }
}

impl PoseTracker for IcpTracker {
    fn track(&mut self, depth: &DepthFrame, prior: &SE3) -> TrackingOutcome {
        let mut metrics = TrackingMetrics {
            n_valid_pixels: depth.valid_pixel_count(),
            ..Default::default()
        };
        if metrics.n_valid_pixels < self.settings.min_valid_pixels {
            return TrackingOutcome::held(TrackingQuality::NotAvailable, prior, metrics);
        }

        let current = VertexMap::from_depth(depth);
        let Some((reference, reference_pose)) = self.reference.as_ref() else {
            // First frame anchors the trajectory at the prior.
            self.reference = Some((current, *prior));
            return TrackingOutcome {
                quality: TrackingQuality::Good,
                pose: *prior,
                metrics,
            };
        };

        let result = match icp::align(reference, reference_pose, &current, prior, &self.settings) {
            Ok(result) => result,
            Err(IcpFailure::TooFewCorrespondences(n)) => {
                metrics.n_correspondences = n;
                trace!(n, "ICP: too few correspondences");
                return TrackingOutcome::held(TrackingQuality::PoorLowFeatures, prior, metrics);
            }
            Err(IcpFailure::Degenerate) => {
                return TrackingOutcome::held(TrackingQuality::NotAvailable, prior, metrics);
            }
        };

        metrics.n_correspondences = result.n_correspondences;
        metrics.iterations = result.iterations;
        metrics.rms_residual_m = result.rms_residual_m;
        metrics.delta_translation_m = prior.distance_to(&result.pose);
        metrics.delta_rotation_deg = prior.angle_to(&result.pose).to_degrees();

        if metrics.delta_translation_m > self.settings.max_frame_translation_m
            || metrics.delta_rotation_deg > self.settings.max_frame_rotation_deg
        {
            return TrackingOutcome::held(TrackingQuality::PoorExcessiveMotion, prior, metrics);
        }

        self.reference = Some((current, result.pose));
        TrackingOutcome {
            quality: TrackingQuality::Good,
            pose: result.pose,
            metrics,
        }
    }

    fn reset(&mut self, _pose: &SE3) {
        self.reference = None;
    }
}
