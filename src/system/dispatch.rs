//! Per-frame dispatch.
//!
//! Called once per delivered frame pair. What the frame is used for depends
//! on the state:
//! - pose initialization: volume placement feedback only
//! - scanning: track, fuse, consider a keyframe, check roaming
//! - finalizing / viewing: live color preview only

use std::sync::Arc;

use tracing::{debug, error, info, trace};

use crate::error::FrameRejection;
use crate::geometry::SE3;
use crate::keyframes::{KeyframeDecision, KeyframeId};
use crate::sensor::{ColorFrame, DepthFrame, FramePair, median_correct_depth};
use crate::system::RoomCaptureState;
use crate::system::capture_core::CaptureCore;
use crate::system::messages::{Advisory, CaptureEvent};
use crate::tracking::{TrackerPose, TrackingQuality};

/// What a dispatched frame was used for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// Pose initialization: share of pixels that landed inside the volume.
    Placement { inside_fraction: f64 },
    /// Scanning: tracking quality and the keyframe captured, if any.
    Tracked {
        quality: TrackingQuality,
        keyframe: Option<KeyframeId>,
    },
}

impl CaptureCore {
    pub(crate) fn process_frame(&mut self, frame: FramePair) -> Result<FrameOutcome, FrameRejection> {
        self.stats.frames_received += 1;
        let result = self.dispatch(frame);
        if let Err(rejection) = result {
            self.stats.frames_rejected += 1;
            trace!(%rejection, "frame not used");
        }
        self.refresh_status();
        self.publish_render();
        result
    }

    fn dispatch(&mut self, frame: FramePair) -> Result<FrameOutcome, FrameRejection> {
        let FramePair {
            timestamp,
            depth,
            color,
            needs_charge,
        } = frame;

        if needs_charge != self.battery_low {
            info!(needs_charge, "sensor battery state changed");
            self.battery_low = needs_charge;
            self.refresh_status();
        }
        if !self.sensor_connected {
            return Err(FrameRejection::SensorPaused);
        }
        if !depth.is_well_formed() {
            return Err(FrameRejection::MalformedDepth);
        }

        let previous = self.last_timestamp.unwrap_or(f64::NEG_INFINITY);
        if !(timestamp > previous) || !timestamp.is_finite() {
            debug!(timestamp, previous, "out-of-order frame dropped");
            return Err(FrameRejection::OutOfOrder { timestamp, previous });
        }
        self.last_timestamp = Some(timestamp);
        self.stats.frames_accepted += 1;
        self.stats.last_frame_at = Some(timestamp);

        if let Some(color) = &color {
            self.color_preview = Some(color.image.clone());
        }

        match self.state {
            RoomCaptureState::PoseInitialization => Ok(self.place_volume(&depth)),
            RoomCaptureState::Scanning => {
                let depth = if self.config.apply_expensive_depth_correction {
                    median_correct_depth(&depth)
                } else {
                    depth
                };
                Ok(self.scan_frame(&depth, color, timestamp))
            }
            state => Err(FrameRejection::Frozen(state)),
        }
    }

    fn place_volume(&mut self, depth: &DepthFrame) -> FrameOutcome {
        let (_, feedback) = self.placement.estimate(depth, &self.volume);
        let inside_fraction = feedback.inside_fraction();
        self.feedback = Some(Arc::new(feedback));
        FrameOutcome::Placement { inside_fraction }
    }

    fn scan_frame(&mut self, depth: &DepthFrame, color: Option<ColorFrame>, timestamp: f64) -> FrameOutcome {
        if self.stats.scan_started_at.is_none() {
            self.stats.scan_started_at = Some(timestamp);
        }

        let prior = match (self.current_pose, self.initial_pose) {
            (Some(last), _) => last.pose,
            (None, Some(initial)) => initial,
            (None, None) => self.placement.camera_pose(&self.volume),
        };
        let outcome = self.tracker.track(depth, &prior);
        let quality = outcome.quality;

        if !quality.is_good() {
            self.on_tracking_failure(prior, timestamp, quality);
            return FrameOutcome::Tracked {
                quality,
                keyframe: None,
            };
        }

        self.failure_streak = 0;
        self.not_available_streak = 0;
        self.update_advisory(Advisory::TrackingLost, false);

        let pose = TrackerPose::new(outcome.pose, timestamp, quality);
        self.record_pose(pose);
        self.stats.frames_tracked += 1;

        if let Some(mapper) = self.mapper.as_mut() {
            mapper.integrate(depth, &pose.pose);
        }

        let motion = self.motion.update(&pose.pose, timestamp);
        let keyframe = color.and_then(|color| self.consider_keyframe(color, &pose, motion.rotation_speed_deg_per_s));

        let drift = self.initial_pose.map_or(0.0, |initial| initial.distance_to(&pose.pose));
        self.update_advisory(
            Advisory::RoamingTooFar,
            drift > self.config.max_distance_from_initial_position_m,
        );

        trace!(
            timestamp,
            drift_m = drift,
            correspondences = outcome.metrics.n_correspondences,
            rotation_speed = motion.rotation_speed_deg_per_s,
            "frame tracked"
        );
        FrameOutcome::Tracked { quality, keyframe }
    }

    /// A bad frame holds the pose and skips fusion. Long streaks end the scan.
    fn on_tracking_failure(&mut self, held: SE3, timestamp: f64, quality: TrackingQuality) {
        self.stats.tracking_failures += 1;
        self.failure_streak += 1;
        self.record_pose(TrackerPose::new(held, timestamp, quality));

        if quality == TrackingQuality::NotAvailable {
            self.not_available_streak += 1;
            if self.not_available_streak >= self.config.tracking_lost_warning_frames {
                self.update_advisory(Advisory::TrackingLost, true);
            }
        } else {
            self.not_available_streak = 0;
        }
        debug!(?quality, streak = self.failure_streak, "tracking failed, pose held");

        if self.failure_streak >= self.config.max_consecutive_tracking_failures {
            let consecutive_failures = self.failure_streak;
            error!(consecutive_failures, "tracking unrecoverable, returning to pose initialization");
            self.emit(CaptureEvent::FatalTrackingError { consecutive_failures });
            self.discard_scan();
            self.transition(RoomCaptureState::PoseInitialization);
        }
    }

    fn record_pose(&mut self, pose: TrackerPose) {
        self.current_pose = Some(pose);
        if self.config.record_frame_history {
            self.history.push(pose);
        }
    }

    fn consider_keyframe(&mut self, color: ColorFrame, pose: &TrackerPose, rotation_speed: f64) -> Option<KeyframeId> {
        let decision = self.selector.evaluate(&pose.pose, rotation_speed, &self.keyframes);
        let KeyframeDecision::Accept(reason) = decision else {
            trace!(?decision, "no keyframe");
            return None;
        };

        let (id, evicted) = self.keyframes.insert(color, pose.pose, pose.timestamp);
        let evicted = evicted.map(|record| record.id);
        self.stats.keyframes_captured += 1;
        if evicted.is_some() {
            self.stats.keyframes_evicted += 1;
        }
        debug!(%id, ?reason, ?evicted, stored = self.keyframes.len(), "keyframe captured");
        self.emit(CaptureEvent::KeyframeCaptured { id, evicted });
        Some(id)
    }
}
