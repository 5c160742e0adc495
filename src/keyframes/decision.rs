//! Keyframe capture policy.
//!
//! Evaluated on every well-tracked scanning frame:
//! - reject if the device is rotating faster than the speed limit (blur)
//! - accept if the store is empty
//! - accept if no stored keyframe is within both the rotation and the
//!   translation threshold of the candidate pose

use crate::config::CaptureSessionConfig;
use crate::geometry::SE3;
use crate::keyframes::KeyframeStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyframeDecision {
    Accept(AcceptReason),
    Reject(RejectReason),
}

impl KeyframeDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptReason {
    /// First keyframe of the scan.
    Bootstrap,
    /// Far enough from every stored keyframe.
    NewViewpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    RotatingTooFast,
    /// A stored keyframe already covers this viewpoint.
    Redundant,
}

/// Thresholds for keyframe selection.
#[derive(Debug, Clone, Copy)]
pub struct KeyframeSelector {
    max_rotation_rad: f64,
    max_translation_m: f64,
    max_rotation_speed_deg_per_s: f64,
}

impl KeyframeSelector {
    pub fn new(max_rotation_deg: f64, max_translation_m: f64, max_rotation_speed_deg_per_s: f64) -> Self {
        Self {
            max_rotation_rad: max_rotation_deg.to_radians(),
            max_translation_m,
            max_rotation_speed_deg_per_s,
        }
    }

    pub fn from_config(config: &CaptureSessionConfig) -> Self {
        Self::new(
            config.max_keyframe_rotation_deg,
            config.max_keyframe_translation_m,
            config.max_keyframe_rotation_speed_deg_per_s,
        )
    }

    /// Decide whether `pose`, observed while rotating at `rotation_speed_deg_per_s`,
    /// should become a keyframe.
    pub fn evaluate(&self, pose: &SE3, rotation_speed_deg_per_s: f64, store: &KeyframeStore) -> KeyframeDecision {
        if !(rotation_speed_deg_per_s <= self.max_rotation_speed_deg_per_s) {
            return KeyframeDecision::Reject(RejectReason::RotatingTooFast);
        }
        if store.is_empty() {
            return KeyframeDecision::Accept(AcceptReason::Bootstrap);
        }

        let covered = store.records().iter().any(|kf| {
            kf.pose.angle_to(pose) <= self.max_rotation_rad
                && kf.pose.distance_to(pose) <= self.max_translation_m
        });
        if covered {
            KeyframeDecision::Reject(RejectReason::Redundant)
        } else {
            KeyframeDecision::Accept(AcceptReason::NewViewpoint)
        }
    }
}
