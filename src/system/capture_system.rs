//! Capture session - main entry point.
//!
//! `CaptureStateMachine` is the handle the frame source, the UI and the
//! render layer share. It is cheap to clone; every clone drives the same
//! session. All mutations are serialized on the session mutex, so a frame
//! can never be processed as `Scanning` after a concurrent transition to
//! `Finalizing`.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};
use nalgebra::Vector3;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::info;

use crate::config::CaptureSessionConfig;
use crate::error::{ConfigError, FrameRejection, IntentError};
use crate::keyframes::KeyframeRecord;
use crate::mapping::ScanVolume;
use crate::mesh::{MeshArtifact, TriangleMesh};
use crate::sensor::{FramePair, SensorEvent};
use crate::system::capture_core::CaptureCore;
use crate::system::shared_state::{RenderSnapshot, SharedState};
use crate::system::{
    AppStatus, BackgroundProcessingStatus, CaptureBackend, CaptureEvent, CaptureStatistics, DefaultBackend,
    FrameOutcome, RoomCaptureState, StatusMessage, UserIntent,
};
use crate::tracking::TrackerPose;

/// Room capture session.
#[derive(Clone)]
pub struct CaptureStateMachine {
    shared: Arc<SharedState>,
    config: Arc<CaptureSessionConfig>,
    events: Receiver<CaptureEvent>,
}

impl CaptureStateMachine {
    /// Create a session with the default tracker, mapper and finalization stages.
    pub fn new(config: CaptureSessionConfig) -> Result<Self, ConfigError> {
        let config = Arc::new(config);
        let backend = Arc::new(DefaultBackend::new(config.clone()));
        Self::with_backend(config, backend)
    }

    /// Create a session with custom components.
    pub fn with_backend(
        config: Arc<CaptureSessionConfig>,
        backend: Arc<dyn CaptureBackend>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (sender, events) = unbounded();
        let render = Arc::new(RwLock::new(RenderSnapshot::default()));
        let core_config = config.clone();
        let shared = Arc::new_cyclic(|weak| SharedState {
            core: Mutex::new(CaptureCore::new(core_config, backend, weak.clone(), sender, render.clone())),
            changed: Condvar::new(),
            render,
        });
        shared.core.lock().publish_render();

        info!(
            max_keyframes = config.max_num_keyframes,
            hardware_registration = config.use_hardware_registered_depth,
            depth_correction = config.apply_expensive_depth_correction,
            "capture session created"
        );
        Ok(Self {
            shared,
            config,
            events,
        })
    }

    /// Run `f` on the core and wake anyone waiting on a change.
    fn with_core<R>(&self, f: impl FnOnce(&mut CaptureCore) -> R) -> R {
        let mut core = self.shared.core.lock();
        let out = f(&mut core);
        drop(core);
        self.shared.changed.notify_all();
        out
    }

    fn read_core<R>(&self, f: impl FnOnce(&CaptureCore) -> R) -> R {
        f(&*self.shared.core.lock())
    }

    // --- Inbound -----------------------------------------------------------

    /// Dispatch one frame pair from the frame source.
    pub fn process_frame(&self, frame: FramePair) -> Result<FrameOutcome, FrameRejection> {
        self.with_core(|core| core.process_frame(frame))
    }

    /// Apply a user intent. Errors are advisory: the intent was a no-op.
    pub fn handle_intent(&self, intent: UserIntent) -> Result<(), IntentError> {
        self.with_core(|core| core.handle_intent(intent))
    }

    pub fn sensor_event(&self, event: SensorEvent) {
        self.with_core(|core| core.sensor_event(event));
    }

    /// Gravity sample from the motion sensor, in the camera frame.
    pub fn submit_gravity(&self, gravity: Vector3<f64>) {
        self.with_core(|core| core.submit_gravity(gravity));
    }

    pub fn set_camera_authorized(&self, authorized: bool) {
        self.with_core(|core| core.set_camera_authorized(authorized));
    }

    pub fn set_camera_calibrated(&self, calibrated: bool) {
        self.with_core(|core| core.set_camera_calibrated(calibrated));
    }

    // --- Outbound ----------------------------------------------------------

    pub fn config(&self) -> &Arc<CaptureSessionConfig> {
        &self.config
    }

    pub fn state(&self) -> RoomCaptureState {
        self.read_core(CaptureCore::state)
    }

    pub fn status(&self) -> AppStatus {
        self.read_core(CaptureCore::status)
    }

    /// The message the status reporter should show, if any.
    pub fn status_message(&self) -> Option<StatusMessage> {
        self.status().message()
    }

    pub fn volume(&self) -> ScanVolume {
        self.read_core(CaptureCore::volume)
    }

    /// Latest tracked pose while scanning.
    pub fn tracker_pose(&self) -> Option<TrackerPose> {
        self.read_core(CaptureCore::current_pose)
    }

    /// Consistent snapshot for the render layer. Never waits on tracking.
    pub fn render_snapshot(&self) -> RenderSnapshot {
        self.shared.render.read().clone()
    }

    /// Mesh to display, only while viewing.
    pub fn mesh(&self) -> Option<Arc<TriangleMesh>> {
        self.shared.render.read().mesh.clone()
    }

    /// The finalization artifact with all of its variants.
    pub fn artifact(&self) -> Option<MeshArtifact> {
        self.read_core(|core| core.artifact().cloned())
    }

    /// Stored keyframes, for persistence.
    pub fn keyframes(&self) -> Vec<KeyframeRecord> {
        self.read_core(|core| core.keyframes().to_vec())
    }

    /// Poses of accepted scanning frames, for persistence.
    pub fn pose_history(&self) -> Vec<TrackerPose> {
        self.read_core(|core| core.history().to_vec())
    }

    pub fn statistics(&self) -> CaptureStatistics {
        self.read_core(CaptureCore::statistics)
    }

    /// Outbound event stream. Clones of the session share one queue.
    pub fn events(&self) -> &Receiver<CaptureEvent> {
        &self.events
    }

    /// Block until the session reaches `state`. Returns false on timeout.
    pub fn wait_for_state(&self, state: RoomCaptureState, timeout: Duration) -> bool {
        self.shared.wait_until(timeout, |core| core.state() == state)
    }

    /// Block until no finalization run is active. Returns false on timeout.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        self.shared.wait_until(timeout, |core| {
            core.status().background == BackgroundProcessingStatus::Idle && !core.is_finalization_active()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    use nalgebra::UnitQuaternion;

    use crate::error::FinalizeError;
    use crate::finalization::CancelToken;
    use crate::geometry::SE3;
    use crate::keyframes::KeyframeId;
    use crate::mapping::VolumeMapper;
    use crate::mesh::{ColorizationQuality, Colorizer, HoleFiller};
    use crate::sensor::{CameraIntrinsics, ColorFrame, ColorImage, DepthFrame};
    use crate::system::{Advisory, MeshVariant};
    use crate::tracking::{PoseTracker, TrackingMetrics, TrackingOutcome, TrackingQuality};

    const WAIT: Duration = Duration::from_secs(5);

    /// Shared knobs for the scripted components.
    struct Script {
        pose: Mutex<SE3>,
        quality: Mutex<TrackingQuality>,
        extraction: Mutex<Result<(), FinalizeError>>,
        hole_filling: Mutex<Result<(), FinalizeError>>,
        colorization: Mutex<Result<(), FinalizeError>>,
        /// Extraction blocks until released (or cancelled).
        hold_extraction: AtomicBool,
        trackers_created: AtomicUsize,
    }

    impl Script {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                pose: Mutex::new(SE3::identity()),
                quality: Mutex::new(TrackingQuality::Good),
                extraction: Mutex::new(Ok(())),
                hole_filling: Mutex::new(Ok(())),
                colorization: Mutex::new(Ok(())),
                hold_extraction: AtomicBool::new(false),
                trackers_created: AtomicUsize::new(0),
            })
        }
    }

    struct ScriptedTracker(Arc<Script>);

    impl PoseTracker for ScriptedTracker {
        fn track(&mut self, _: &DepthFrame, prior: &SE3) -> TrackingOutcome {
            let quality = *self.0.quality.lock();
            let pose = if quality.is_good() { *self.0.pose.lock() } else { *prior };
            TrackingOutcome {
                quality,
                pose,
                metrics: TrackingMetrics::default(),
            }
        }

        fn reset(&mut self, pose: &SE3) {
            *self.0.pose.lock() = *pose;
        }
    }

    struct ScriptedMapper {
        volume: ScanVolume,
        frames: usize,
        script: Arc<Script>,
    }

    impl VolumeMapper for ScriptedMapper {
        fn volume(&self) -> &ScanVolume {
            &self.volume
        }

        fn integrate(&mut self, _: &DepthFrame, _: &SE3) {
            self.frames += 1;
        }

        fn frames_integrated(&self) -> usize {
            self.frames
        }

        fn extract_mesh(&self, cancel: &CancelToken) -> Result<TriangleMesh, FinalizeError> {
            while self.script.hold_extraction.load(Ordering::SeqCst) {
                cancel.check()?;
                thread::sleep(Duration::from_millis(1));
            }
            self.script.extraction.lock().clone()?;
            Ok(TriangleMesh::new(
                vec![Vector3::zeros(), Vector3::x(), Vector3::y()],
                vec![[0, 1, 2]],
            ))
        }
    }

    struct ScriptedFiller(Arc<Script>);

    impl HoleFiller for ScriptedFiller {
        fn fill(&self, mesh: &TriangleMesh, _: &CancelToken) -> Result<TriangleMesh, FinalizeError> {
            self.0.hole_filling.lock().clone()?;
            let mut filled = mesh.clone();
            filled.triangles.push([2, 1, 0]);
            Ok(filled)
        }
    }

    struct ScriptedColorizer(Arc<Script>);

    impl Colorizer for ScriptedColorizer {
        fn colorize(
            &self,
            mesh: &TriangleMesh,
            _: &[KeyframeRecord],
            _: ColorizationQuality,
            _: &CancelToken,
        ) -> Result<TriangleMesh, FinalizeError> {
            self.0.colorization.lock().clone()?;
            let mut colored = mesh.clone();
            colored.colors = Some(vec![[200, 100, 50]; mesh.num_vertices()]);
            Ok(colored)
        }
    }

    struct ScriptedBackend(Arc<Script>);

    impl CaptureBackend for ScriptedBackend {
        fn new_tracker(&self) -> Box<dyn PoseTracker> {
            self.0.trackers_created.fetch_add(1, Ordering::SeqCst);
            Box::new(ScriptedTracker(self.0.clone()))
        }

        fn new_mapper(&self, volume: ScanVolume) -> Box<dyn VolumeMapper> {
            Box::new(ScriptedMapper {
                volume,
                frames: 0,
                script: self.0.clone(),
            })
        }

        fn hole_filler(&self) -> Arc<dyn HoleFiller> {
            Arc::new(ScriptedFiller(self.0.clone()))
        }

        fn colorizer(&self) -> Arc<dyn Colorizer> {
            Arc::new(ScriptedColorizer(self.0.clone()))
        }
    }

    fn session_with(script: &Arc<Script>, config: CaptureSessionConfig) -> CaptureStateMachine {
        CaptureStateMachine::with_backend(Arc::new(config), Arc::new(ScriptedBackend(script.clone()))).unwrap()
    }

    fn session(script: &Arc<Script>) -> CaptureStateMachine {
        session_with(script, CaptureSessionConfig::default())
    }

    fn frame(timestamp: f64) -> FramePair {
        let k = CameraIntrinsics::from_fov(4, 3, 60.0);
        FramePair::new(
            timestamp,
            DepthFrame::new(k, vec![1.5; 12]),
            Some(ColorFrame {
                intrinsics: k,
                image: Arc::new(ColorImage::filled(4, 3, [90, 90, 90])),
            }),
        )
    }

    fn drain(sm: &CaptureStateMachine) -> Vec<CaptureEvent> {
        sm.events().try_iter().collect()
    }

    fn transitions(events: &[CaptureEvent]) -> Vec<(RoomCaptureState, RoomCaptureState)> {
        events
            .iter()
            .filter_map(|e| match e {
                CaptureEvent::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    fn count(events: &[CaptureEvent], wanted: &CaptureEvent) -> usize {
        events.iter().filter(|e| *e == wanted).count()
    }

    /// Scan a few frames and finish.
    fn scan_and_finish(sm: &CaptureStateMachine, script: &Script) {
        sm.handle_intent(UserIntent::StartScan).unwrap();
        let start = sm.render_snapshot().camera_pose.unwrap();
        for i in 0..5 {
            *script.pose.lock() = start * SE3::from_translation(Vector3::new(0.01 * i as f64, 0.0, 0.0));
            sm.process_frame(frame(1.0 + i as f64)).unwrap();
        }
        sm.handle_intent(UserIntent::Done).unwrap();
    }

    #[test]
    fn test_full_capture_cycle() {
        let script = Script::new();
        let sm = session(&script);
        assert_eq!(sm.state(), RoomCaptureState::PoseInitialization);

        scan_and_finish(&sm, &script);
        assert!(sm.wait_for_state(RoomCaptureState::Viewing, WAIT));
        assert!(sm.wait_for_idle(WAIT));
        assert_eq!(sm.mesh().unwrap().num_triangles(), 1);
        assert!(sm.render_snapshot().camera_pose.is_none());

        sm.handle_intent(UserIntent::Reset).unwrap();
        assert_eq!(sm.state(), RoomCaptureState::PoseInitialization);
        assert!(sm.mesh().is_none());
        assert!(sm.artifact().is_none());
        assert!(sm.keyframes().is_empty());

        use RoomCaptureState::*;
        assert_eq!(
            transitions(&drain(&sm)),
            vec![
                (PoseInitialization, Scanning),
                (Scanning, Finalizing),
                (Finalizing, Viewing),
                (Viewing, PoseInitialization),
            ]
        );
        // Initial tracker plus one per reset.
        assert_eq!(script.trackers_created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalid_state_intents_are_noops() {
        let script = Script::new();
        let sm = session(&script);
        assert!(matches!(
            sm.handle_intent(UserIntent::Done),
            Err(IntentError::InvalidState { intent: "done", .. })
        ));
        sm.handle_intent(UserIntent::StartScan).unwrap();
        assert!(matches!(
            sm.handle_intent(UserIntent::StartScan),
            Err(IntentError::InvalidState { .. })
        ));
        assert!(matches!(
            sm.handle_intent(UserIntent::SetVolumeSize(Vector3::new(3.0, 3.0, 3.0))),
            Err(IntentError::InvalidState { .. })
        ));
        assert!(matches!(
            sm.handle_intent(UserIntent::SetResolution(0.02)),
            Err(IntentError::InvalidState { .. })
        ));
        assert_eq!(sm.state(), RoomCaptureState::Scanning);
    }

    #[test]
    fn test_start_scan_blocked_by_sensor_and_camera() {
        let script = Script::new();
        let sm = session(&script);

        sm.sensor_event(SensorEvent::Disconnected);
        assert_eq!(sm.handle_intent(UserIntent::StartScan), Err(IntentError::SensorNotReady));
        assert_eq!(sm.status_message(), Some(StatusMessage::ConnectSensor));

        sm.sensor_event(SensorEvent::Connected);
        sm.set_camera_authorized(false);
        assert_eq!(sm.status_message(), Some(StatusMessage::NeedCameraAccess));
        assert_eq!(sm.handle_intent(UserIntent::StartScan), Err(IntentError::CameraUnavailable));

        sm.set_camera_authorized(true);
        sm.sensor_event(SensorEvent::LowBattery);
        assert_eq!(sm.status_message(), Some(StatusMessage::ChargeSensor));
        assert_eq!(sm.handle_intent(UserIntent::StartScan), Err(IntentError::SensorNotReady));

        sm.sensor_event(SensorEvent::BatteryOk);
        assert_eq!(sm.status_message(), None);
        assert!(sm.handle_intent(UserIntent::StartScan).is_ok());
    }

    #[test]
    fn test_extraction_failure_returns_to_pose_initialization() {
        let script = Script::new();
        *script.extraction.lock() = Err(FinalizeError::EmptyVolume);
        let sm = session(&script);

        sm.handle_intent(UserIntent::RequestColorization).unwrap();
        scan_and_finish(&sm, &script);
        assert!(sm.wait_for_state(RoomCaptureState::PoseInitialization, WAIT));
        assert!(sm.wait_for_idle(WAIT));
        assert!(sm.artifact().is_none());
        assert!(sm.mesh().is_none());
        assert!(sm.keyframes().is_empty());

        let events = drain(&sm);
        assert_eq!(
            count(&events, &CaptureEvent::ExtractionFailed(FinalizeError::EmptyVolume)),
            1
        );
        assert!(!events.contains(&CaptureEvent::MeshUpdated(MeshVariant::Extracted)));
    }

    #[test]
    fn test_hole_filling_failure_then_colorization_success() {
        let script = Script::new();
        *script.hole_filling.lock() = Err(FinalizeError::StageFailed {
            stage: "hole_filling",
            reason: "scripted".to_string(),
        });
        let sm = session(&script);

        sm.handle_intent(UserIntent::RequestHoleFilling).unwrap();
        sm.handle_intent(UserIntent::RequestColorization).unwrap();
        scan_and_finish(&sm, &script);
        assert!(sm.wait_for_state(RoomCaptureState::Viewing, WAIT));
        assert!(sm.wait_for_idle(WAIT));

        let artifact = sm.artifact().unwrap();
        assert!(artifact.is_colorized());
        assert!(!artifact.is_hole_filled());
        assert_eq!(artifact.color_quality, Some(ColorizationQuality::Enhanced));
        assert_eq!(artifact.warnings.len(), 1);
        assert_eq!(artifact.current().num_triangles(), 1);
        assert!(sm.mesh().unwrap().is_colorized());

        let events = drain(&sm);
        assert!(events.iter().any(|e| matches!(e, CaptureEvent::StageSkipped { stage: "hole_filling", .. })));
        assert_eq!(count(&events, &CaptureEvent::MeshUpdated(MeshVariant::ColorPreview)), 1);
        assert_eq!(count(&events, &CaptureEvent::MeshUpdated(MeshVariant::ColorEnhanced)), 1);
    }

    #[test]
    fn test_colorization_failure_keeps_uncolored_mesh() {
        let script = Script::new();
        *script.colorization.lock() = Err(FinalizeError::NoKeyframes);
        let sm = session(&script);

        sm.handle_intent(UserIntent::RequestHoleFilling).unwrap();
        sm.handle_intent(UserIntent::RequestColorization).unwrap();
        scan_and_finish(&sm, &script);
        assert!(sm.wait_for_state(RoomCaptureState::Viewing, WAIT));
        assert!(sm.wait_for_idle(WAIT));

        let artifact = sm.artifact().unwrap();
        assert!(artifact.is_hole_filled());
        assert!(!artifact.is_colorized());
        assert_eq!(sm.mesh().unwrap().num_triangles(), 2);
    }

    #[test]
    fn test_roaming_warning_raised_once() {
        let script = Script::new();
        let sm = session(&script);

        sm.handle_intent(UserIntent::SetVolumeSize(Vector3::new(6.0, 4.0, 6.0))).unwrap();
        sm.handle_intent(UserIntent::SetResolution(0.05)).unwrap();
        let volume = sm.volume();
        assert_eq!(volume.size_m, Vector3::new(6.0, 4.0, 6.0));
        assert_eq!(volume.resolution_m, 0.05);

        sm.handle_intent(UserIntent::StartScan).unwrap();
        assert_eq!(sm.state(), RoomCaptureState::Scanning);
        let start = sm.render_snapshot().camera_pose.unwrap();
        assert_eq!(start.translation, Vector3::new(3.0, 2.0, 3.0));

        let mut t = 0.0;
        let mut deliver = |drift: f64| {
            t += 1.0 / 30.0;
            *script.pose.lock() = SE3::from_translation(start.translation + Vector3::new(drift, 0.0, 0.0));
            sm.process_frame(frame(t)).unwrap()
        };

        for i in 1..=50 {
            let outcome = deliver(0.5 * i as f64 / 50.0);
            assert!(matches!(outcome, FrameOutcome::Tracked { quality: TrackingQuality::Good, .. }));
        }
        let roaming = CaptureEvent::AdvisoryRaised(Advisory::RoamingTooFar);
        assert_eq!(count(&drain(&sm), &roaming), 0);
        assert_eq!(sm.status_message(), None);

        for i in 1..=20 {
            deliver(0.5 + 0.7 * i as f64 / 20.0);
        }
        for _ in 0..10 {
            deliver(1.2);
        }
        let events = drain(&sm);
        assert_eq!(count(&events, &roaming), 1);
        assert_eq!(sm.status_message(), Some(StatusMessage::RoamingTooFar));

        deliver(0.8);
        let events = drain(&sm);
        assert_eq!(count(&events, &CaptureEvent::AdvisoryCleared(Advisory::RoamingTooFar)), 1);
        assert_eq!(sm.status_message(), None);

        deliver(1.1);
        assert_eq!(count(&drain(&sm), &roaming), 1);
    }

    #[test]
    fn test_sensor_disconnect_blocks_done() {
        let script = Script::new();
        let sm = session(&script);
        sm.handle_intent(UserIntent::StartScan).unwrap();
        sm.process_frame(frame(1.0)).unwrap();

        sm.sensor_event(SensorEvent::Disconnected);
        assert_eq!(sm.status().sensor, crate::system::SensorStatus::NeedsConnect);
        assert_eq!(sm.status_message(), Some(StatusMessage::ConnectSensor));
        assert_eq!(sm.process_frame(frame(2.0)), Err(FrameRejection::SensorPaused));
        assert_eq!(sm.handle_intent(UserIntent::Done), Err(IntentError::SensorNotReady));
        assert_eq!(sm.state(), RoomCaptureState::Scanning);

        sm.sensor_event(SensorEvent::Connected);
        assert!(sm.process_frame(frame(3.0)).is_ok());
        sm.handle_intent(UserIntent::Done).unwrap();
        assert!(sm.wait_for_state(RoomCaptureState::Viewing, WAIT));
    }

    #[test]
    fn test_disconnect_finalizes_when_configured() {
        let script = Script::new();
        let config = CaptureSessionConfig {
            finalize_on_sensor_disconnect: true,
            ..Default::default()
        };
        let sm = session_with(&script, config);
        sm.handle_intent(UserIntent::StartScan).unwrap();
        sm.process_frame(frame(1.0)).unwrap();

        sm.sensor_event(SensorEvent::Disconnected);
        assert_ne!(sm.state(), RoomCaptureState::Scanning);
        assert!(sm.wait_for_state(RoomCaptureState::Viewing, WAIT));
    }

    #[test]
    fn test_tracking_lost_then_forced_reset() {
        let script = Script::new();
        let sm = session(&script);
        sm.handle_intent(UserIntent::StartScan).unwrap();
        sm.process_frame(frame(1.0)).unwrap();
        assert_eq!(sm.keyframes().len(), 1);

        *script.quality.lock() = TrackingQuality::NotAvailable;
        let held = sm.tracker_pose().unwrap().pose;
        for i in 0..2 {
            sm.process_frame(frame(2.0 + i as f64)).unwrap();
        }
        let lost = CaptureEvent::AdvisoryRaised(Advisory::TrackingLost);
        assert_eq!(count(&drain(&sm), &lost), 0);
        assert_eq!(sm.tracker_pose().unwrap().pose, held);

        sm.process_frame(frame(4.0)).unwrap();
        assert_eq!(sm.status_message(), Some(StatusMessage::TrackingLost));
        assert_eq!(sm.state(), RoomCaptureState::Scanning);

        // Streak of 30 failures total ends the scan.
        for i in 0..27 {
            sm.process_frame(frame(5.0 + i as f64)).unwrap();
        }
        assert_eq!(sm.state(), RoomCaptureState::PoseInitialization);
        assert!(sm.keyframes().is_empty());
        let events = drain(&sm);
        assert_eq!(count(&events, &lost), 1);
        assert_eq!(
            count(&events, &CaptureEvent::FatalTrackingError { consecutive_failures: 30 }),
            1
        );
        assert_eq!(sm.status_message(), None);
    }

    #[test]
    fn test_out_of_order_frames_rejected() {
        let script = Script::new();
        let sm = session(&script);
        assert!(matches!(sm.process_frame(frame(1.0)), Ok(FrameOutcome::Placement { .. })));
        assert_eq!(
            sm.process_frame(frame(1.0)),
            Err(FrameRejection::OutOfOrder {
                timestamp: 1.0,
                previous: 1.0
            })
        );
        assert!(sm.process_frame(frame(0.5)).is_err());
        assert!(sm.process_frame(frame(1.5)).is_ok());

        let stats = sm.statistics();
        assert_eq!(stats.frames_received, 4);
        assert_eq!(stats.frames_accepted, 2);
        assert_eq!(stats.frames_rejected, 2);
    }

    #[test]
    fn test_pose_initialization_publishes_feedback() {
        let script = Script::new();
        let sm = session(&script);
        sm.submit_gravity(Vector3::new(0.0, 9.81, 0.0));
        sm.process_frame(frame(1.0)).unwrap();

        let snapshot = sm.render_snapshot();
        assert_eq!(snapshot.state, RoomCaptureState::PoseInitialization);
        assert!(snapshot.camera_pose.is_some());
        let feedback = snapshot.volume_feedback.unwrap();
        assert_eq!(feedback.inside.len(), 12);
        assert!(feedback.inside.iter().all(|b| *b));
        assert!(snapshot.color_preview.is_some());

        sm.handle_intent(UserIntent::StartScan).unwrap();
        assert!(sm.render_snapshot().volume_feedback.is_none());
    }

    #[test]
    fn test_done_ignored_while_finalizing_and_reset_cancels() {
        let script = Script::new();
        script.hold_extraction.store(true, Ordering::SeqCst);
        let sm = session(&script);

        scan_and_finish(&sm, &script);
        assert_eq!(sm.state(), RoomCaptureState::Finalizing);
        assert_eq!(sm.status_message(), Some(StatusMessage::Finalizing));
        assert_eq!(sm.handle_intent(UserIntent::Done), Err(IntentError::FinalizationActive));
        assert!(matches!(sm.process_frame(frame(100.0)), Err(FrameRejection::Frozen(_))));

        sm.handle_intent(UserIntent::Reset).unwrap();
        assert_eq!(sm.state(), RoomCaptureState::PoseInitialization);
        assert!(sm.wait_for_idle(WAIT));

        script.hold_extraction.store(false, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sm.state(), RoomCaptureState::PoseInitialization);
        assert!(sm.artifact().is_none());
    }

    #[test]
    fn test_viewing_post_processing() {
        let script = Script::new();
        let sm = session(&script);
        scan_and_finish(&sm, &script);
        assert!(sm.wait_for_state(RoomCaptureState::Viewing, WAIT));
        assert!(sm.wait_for_idle(WAIT));
        assert!(!sm.artifact().unwrap().is_hole_filled());

        sm.handle_intent(UserIntent::RequestHoleFilling).unwrap();
        assert!(sm.wait_for_idle(WAIT));
        assert_eq!(sm.state(), RoomCaptureState::Viewing);
        assert!(sm.artifact().unwrap().is_hole_filled());
        assert_eq!(sm.mesh().unwrap().num_triangles(), 2);

        sm.handle_intent(UserIntent::RequestColorization).unwrap();
        assert!(sm.wait_for_idle(WAIT));
        let artifact = sm.artifact().unwrap();
        assert!(artifact.is_colorized());
        assert_eq!(artifact.current().num_triangles(), 2);
    }

    #[test]
    fn test_failed_recolor_after_fill_shows_filled_mesh() {
        let script = Script::new();
        let sm = session(&script);
        sm.handle_intent(UserIntent::RequestColorization).unwrap();
        scan_and_finish(&sm, &script);
        assert!(sm.wait_for_state(RoomCaptureState::Viewing, WAIT));
        assert!(sm.wait_for_idle(WAIT));
        assert!(sm.artifact().unwrap().is_colorized());

        *script.colorization.lock() = Err(FinalizeError::NoKeyframes);
        sm.handle_intent(UserIntent::RequestHoleFilling).unwrap();
        assert!(sm.wait_for_idle(WAIT));

        let artifact = sm.artifact().unwrap();
        assert!(artifact.is_hole_filled());
        assert!(!artifact.is_colorized());
        assert_eq!(artifact.color_quality, None);
        assert_eq!(artifact.current().num_triangles(), 2);
        assert_eq!(sm.mesh().unwrap().num_triangles(), 2);
        assert!(drain(&sm)
            .iter()
            .any(|e| matches!(e, CaptureEvent::StageSkipped { stage: "colorization", .. })));
    }

    #[test]
    fn test_interleaved_poor_frames_break_lost_streak() {
        let script = Script::new();
        let sm = session(&script);
        sm.handle_intent(UserIntent::StartScan).unwrap();
        sm.process_frame(frame(1.0)).unwrap();

        let sequence = [
            TrackingQuality::NotAvailable,
            TrackingQuality::PoorLowFeatures,
            TrackingQuality::NotAvailable,
            TrackingQuality::PoorLowFeatures,
            TrackingQuality::NotAvailable,
        ];
        for (i, quality) in sequence.into_iter().enumerate() {
            *script.quality.lock() = quality;
            sm.process_frame(frame(2.0 + i as f64)).unwrap();
        }
        let lost = CaptureEvent::AdvisoryRaised(Advisory::TrackingLost);
        assert_eq!(count(&drain(&sm), &lost), 0);
        assert_eq!(sm.status_message(), None);

        // Two more make three in a row.
        *script.quality.lock() = TrackingQuality::NotAvailable;
        sm.process_frame(frame(7.0)).unwrap();
        sm.process_frame(frame(8.0)).unwrap();
        assert_eq!(count(&drain(&sm), &lost), 1);
        assert_eq!(sm.status_message(), Some(StatusMessage::TrackingLost));
    }

    #[test]
    fn test_keyframes_bounded_and_speed_gated() {
        let script = Script::new();
        let config = CaptureSessionConfig {
            max_num_keyframes: 3,
            ..Default::default()
        };
        let sm = session_with(&script, config);
        sm.handle_intent(UserIntent::StartScan).unwrap();
        let start = sm.render_snapshot().camera_pose.unwrap();

        let mut captured = Vec::new();
        for i in 0..8 {
            let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), (30.0 * i as f64).to_radians());
            *script.pose.lock() = SE3::new(yaw * start.rotation, start.translation);
            // 30 degrees per 100 s stays under the speed limit.
            if let Ok(FrameOutcome::Tracked {
                keyframe: Some(id), ..
            }) = sm.process_frame(frame(100.0 * (i + 1) as f64))
            {
                captured.push(id);
            }
            assert!(sm.keyframes().len() <= 3);
        }
        assert_eq!(captured.len(), 8);
        assert_eq!(captured[7], KeyframeId(7));
        assert_eq!(sm.statistics().keyframes_evicted, 5);

        // Fast turn: no keyframe even though the view is new.
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 300f64.to_radians());
        *script.pose.lock() = SE3::new(yaw * start.rotation, start.translation);
        let outcome = sm.process_frame(frame(800.5)).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Tracked {
                quality: TrackingQuality::Good,
                keyframe: None
            }
        );
        assert_eq!(sm.pose_history().len(), 9);
    }
}
