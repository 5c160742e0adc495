//! Capture core: the single owner of all scan state.
//!
//! Every mutation goes through `CaptureCore` while the session mutex is held:
//! intents, sensor events, frame dispatch (`dispatch.rs`) and finalization
//! completions (`completion.rs`). External components only see snapshots.

use std::sync::{Arc, Weak};

use crossbeam_channel::Sender;
use nalgebra::Vector3;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::CaptureSessionConfig;
use crate::error::IntentError;
use crate::finalization::{FinalizationPipeline, MeshSource};
use crate::geometry::SE3;
use crate::keyframes::{KeyframeRecord, KeyframeSelector, KeyframeStore};
use crate::mapping::{ScanVolume, VolumeMapper};
use crate::mesh::MeshArtifact;
use crate::sensor::{ColorImage, SensorEvent};
use crate::system::completion::ActiveRun;
use crate::system::messages::{Advisory, CaptureEvent};
use crate::system::shared_state::{RenderSnapshot, SharedState};
use crate::system::{
    AppStatus, BackgroundProcessingStatus, CaptureBackend, CaptureStatistics, PlacementEstimator,
    RoomCaptureState, SensorStatus, StatusMessage, UserIntent, VolumeFeedback, WarningLatch,
};
use crate::tracking::{MotionModel, PoseTracker, TrackerPose};

pub struct CaptureCore {
    pub(super) config: Arc<CaptureSessionConfig>,
    pub(super) backend: Arc<dyn CaptureBackend>,
    pub(super) pipeline: FinalizationPipeline,
    /// Back-reference for finalization sinks.
    pub(super) shared: Weak<SharedState>,
    pub(super) events: Sender<CaptureEvent>,
    pub(super) render: Arc<RwLock<RenderSnapshot>>,

    pub(super) state: RoomCaptureState,
    pub(super) status: AppStatus,
    pub(super) published_message: Option<StatusMessage>,
    pub(super) sensor_connected: bool,
    pub(super) battery_low: bool,

    pub(super) volume: ScanVolume,
    pub(super) resolution_override: Option<f64>,
    pub(super) placement: PlacementEstimator,
    pub(super) feedback: Option<Arc<VolumeFeedback>>,
    pub(super) color_preview: Option<Arc<ColorImage>>,

    pub(super) tracker: Box<dyn PoseTracker>,
    /// Present only while scanning.
    pub(super) mapper: Option<Box<dyn VolumeMapper>>,
    pub(super) motion: MotionModel,
    pub(super) selector: KeyframeSelector,
    pub(super) keyframes: KeyframeStore,
    pub(super) initial_pose: Option<SE3>,
    pub(super) current_pose: Option<TrackerPose>,
    pub(super) last_timestamp: Option<f64>,
    pub(super) not_available_streak: usize,
    pub(super) failure_streak: usize,
    pub(super) tracking_lost: WarningLatch,
    pub(super) roaming: WarningLatch,

    pub(super) hole_filling_requested: bool,
    pub(super) colorization_requested: bool,
    pub(super) next_run: u64,
    pub(super) active_run: Option<ActiveRun>,
    pub(super) artifact: Option<MeshArtifact>,

    pub(super) history: Vec<TrackerPose>,
    pub(super) stats: CaptureStatistics,
}

impl CaptureCore {
    pub(crate) fn new(
        config: Arc<CaptureSessionConfig>,
        backend: Arc<dyn CaptureBackend>,
        shared: Weak<SharedState>,
        events: Sender<CaptureEvent>,
        render: Arc<RwLock<RenderSnapshot>>,
    ) -> Self {
        let pipeline = FinalizationPipeline::new(backend.hole_filler(), backend.colorizer());
        let status = AppStatus {
            messages_enabled: config.status_messages_enabled,
            ..Default::default()
        };
        Self {
            pipeline,
            tracker: backend.new_tracker(),
            selector: KeyframeSelector::from_config(&config),
            keyframes: KeyframeStore::new(config.max_num_keyframes),
            volume: ScanVolume::initial(&config),
            backend,
            shared,
            events,
            render,
            state: RoomCaptureState::PoseInitialization,
            status,
            published_message: None,
            sensor_connected: true,
            battery_low: false,
            resolution_override: None,
            placement: PlacementEstimator::new(),
            feedback: None,
            color_preview: None,
            mapper: None,
            motion: MotionModel::new(),
            initial_pose: None,
            current_pose: None,
            last_timestamp: None,
            not_available_streak: 0,
            failure_streak: 0,
            tracking_lost: WarningLatch::default(),
            roaming: WarningLatch::default(),
            hole_filling_requested: false,
            colorization_requested: false,
            next_run: 0,
            active_run: None,
            artifact: None,
            history: Vec::new(),
            stats: CaptureStatistics::default(),
            config,
        }
    }

    pub fn state(&self) -> RoomCaptureState {
        self.state
    }

    pub fn status(&self) -> AppStatus {
        self.status
    }

    pub fn volume(&self) -> ScanVolume {
        self.volume
    }

    pub fn current_pose(&self) -> Option<TrackerPose> {
        self.current_pose
    }

    pub fn artifact(&self) -> Option<&MeshArtifact> {
        self.artifact.as_ref()
    }

    pub fn keyframes(&self) -> &[KeyframeRecord] {
        self.keyframes.records()
    }

    pub fn history(&self) -> &[TrackerPose] {
        &self.history
    }

    pub fn statistics(&self) -> CaptureStatistics {
        self.stats
    }

    pub fn is_finalization_active(&self) -> bool {
        self.active_run.is_some()
    }

    pub(super) fn emit(&self, event: CaptureEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    // ---------------------------------------------------------------------
    // Intents
    // ---------------------------------------------------------------------

    pub(crate) fn handle_intent(&mut self, intent: UserIntent) -> Result<(), IntentError> {
        let result = match intent {
            UserIntent::StartScan => self.start_scan(),
            UserIntent::Done => self.finish_scan(),
            UserIntent::Reset => {
                self.reset();
                Ok(())
            }
            UserIntent::SetVolumeSize(size) => self.set_volume_size(size),
            UserIntent::SetResolution(resolution) => self.set_resolution(resolution),
            UserIntent::RequestHoleFilling => self.request_stages(true, false),
            UserIntent::RequestColorization => self.request_stages(false, true),
        };
        if let Err(ref e) = result {
            debug!(intent = intent.name(), state = %self.state, error = %e, "intent ignored");
        }
        self.refresh_status();
        result
    }

    fn require_state(&self, intent: &'static str, expected: RoomCaptureState) -> Result<(), IntentError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(IntentError::InvalidState {
                intent,
                state: self.state,
            })
        }
    }

    fn start_scan(&mut self) -> Result<(), IntentError> {
        self.require_state("start_scan", RoomCaptureState::PoseInitialization)?;
        if self.status.sensor != SensorStatus::Ok {
            return Err(IntentError::SensorNotReady);
        }
        if !self.status.camera_ready() {
            return Err(IntentError::CameraUnavailable);
        }
        if !self.volume.is_confirmed() {
            return Err(IntentError::VolumeNotConfirmed);
        }

        let start = self.placement.camera_pose(&self.volume);
        self.tracker.reset(&start);
        self.mapper = Some(self.backend.new_mapper(self.volume));
        self.motion.reset();
        self.keyframes = KeyframeStore::new(self.config.max_num_keyframes);
        self.initial_pose = Some(start);
        self.current_pose = None;
        self.not_available_streak = 0;
        self.failure_streak = 0;
        self.feedback = None;
        self.history.clear();

        info!(
            size = ?self.volume.size_m.as_slice(),
            resolution_m = self.volume.resolution_m,
            gravity_aligned = self.placement.has_gravity(),
            "scan started"
        );
        self.transition(RoomCaptureState::Scanning);
        Ok(())
    }

    fn finish_scan(&mut self) -> Result<(), IntentError> {
        match self.state {
            RoomCaptureState::Scanning => {}
            RoomCaptureState::Finalizing => return Err(IntentError::FinalizationActive),
            state => {
                return Err(IntentError::InvalidState {
                    intent: "done",
                    state,
                });
            }
        }
        if self.status.sensor != SensorStatus::Ok {
            return Err(IntentError::SensorNotReady);
        }
        self.begin_finalization();
        Ok(())
    }

    fn reset(&mut self) {
        info!(state = %self.state, "reset requested");
        self.discard_scan();
        if self.state == RoomCaptureState::PoseInitialization {
            self.publish_render();
        } else {
            self.transition(RoomCaptureState::PoseInitialization);
        }
    }

    fn set_volume_size(&mut self, size: Vector3<f64>) -> Result<(), IntentError> {
        self.require_state("set_volume_size", RoomCaptureState::PoseInitialization)?;
        if let Some(bad) = size.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
            return Err(IntentError::InvalidValue {
                what: "volume size",
                value: *bad,
            });
        }
        self.volume = ScanVolume::sized(size, self.resolution_override, &self.config);
        self.volume_changed();
        Ok(())
    }

    fn set_resolution(&mut self, resolution_m: f64) -> Result<(), IntentError> {
        self.require_state("set_resolution", RoomCaptureState::PoseInitialization)?;
        if !(resolution_m.is_finite() && resolution_m > 0.0) {
            return Err(IntentError::InvalidValue {
                what: "resolution",
                value: resolution_m,
            });
        }
        self.resolution_override = Some(resolution_m);
        self.volume = ScanVolume::sized(self.volume.size_m, Some(resolution_m), &self.config);
        self.volume_changed();
        Ok(())
    }

    fn volume_changed(&mut self) {
        info!(
            size = ?self.volume.size_m.as_slice(),
            resolution_m = self.volume.resolution_m,
            voxels = ?self.volume.voxel_dims(),
            "scan volume changed"
        );
        self.feedback = None;
        self.emit(CaptureEvent::VolumeChanged(self.volume));
        self.publish_render();
    }

    /// Arm optional stages for the next run, or re-run them on the finished mesh.
    fn request_stages(&mut self, hole_filling: bool, colorization: bool) -> Result<(), IntentError> {
        let intent = if hole_filling { "request_hole_filling" } else { "request_colorization" };
        match self.state {
            RoomCaptureState::PoseInitialization | RoomCaptureState::Scanning => {
                self.hole_filling_requested |= hole_filling;
                self.colorization_requested |= colorization;
                debug!(intent, "finalization stage armed");
                Ok(())
            }
            RoomCaptureState::Finalizing => Err(IntentError::FinalizationActive),
            RoomCaptureState::Viewing => {
                if self.active_run.is_some() {
                    return Err(IntentError::FinalizationActive);
                }
                let Some(artifact) = self.artifact.as_ref() else {
                    return Err(IntentError::InvalidState {
                        intent,
                        state: self.state,
                    });
                };
                // A colorized mesh is recolored after its geometry changes.
                let recolor = colorization || (hole_filling && artifact.is_colorized());
                let source = MeshSource::Mesh(artifact.geometry().clone());
                self.hole_filling_requested |= hole_filling;
                self.colorization_requested |= colorization;
                info!(hole_filling, colorization = recolor, "post-processing finished mesh");
                self.start_run(source, hole_filling, recolor, false)
                    .map_err(|e| {
                        error!(error = %e, "failed to start post-processing");
                        IntentError::WorkerUnavailable(e.to_string())
                    })
            }
        }
    }

    // ---------------------------------------------------------------------
    // Sensor and device status
    // ---------------------------------------------------------------------

    pub(crate) fn sensor_event(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::Connected => self.sensor_connected = true,
            SensorEvent::Disconnected => self.sensor_connected = false,
            SensorEvent::LowBattery => self.battery_low = true,
            SensorEvent::BatteryOk => self.battery_low = false,
        }
        info!(?event, state = %self.state, "sensor event");
        self.refresh_status();

        if event == SensorEvent::Disconnected
            && self.state == RoomCaptureState::Scanning
            && self.config.finalize_on_sensor_disconnect
        {
            warn!("sensor disconnected mid-scan, finalizing what was mapped");
            self.begin_finalization();
            self.refresh_status();
        }
    }

    pub(crate) fn set_camera_authorized(&mut self, authorized: bool) {
        self.status.camera_authorized = authorized;
        self.refresh_status();
    }

    pub(crate) fn set_camera_calibrated(&mut self, calibrated: bool) {
        self.status.camera_calibrated = calibrated;
        self.refresh_status();
    }

    pub(crate) fn submit_gravity(&mut self, gravity: Vector3<f64>) {
        if !self.placement.submit_gravity(gravity) {
            debug!(?gravity, "degenerate gravity sample ignored");
        }
    }

    // ---------------------------------------------------------------------
    // Transitions and publication
    // ---------------------------------------------------------------------

    pub(super) fn transition(&mut self, to: RoomCaptureState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug_assert!(from.can_advance_to(to), "{from} -> {to}");
        info!(%from, %to, "state transition");

        if from == RoomCaptureState::Scanning {
            self.tracking_lost.clear();
            self.roaming.clear();
        }
        self.state = to;
        self.emit(CaptureEvent::StateChanged { from, to });
        self.refresh_status();
        self.publish_render();
    }

    /// Drop everything belonging to the current scan. The next scan starts
    /// with a fresh tracker, mapper and keyframe store.
    pub(super) fn discard_scan(&mut self) {
        if let Some(run) = self.active_run.take() {
            debug!(run = run.handle.run().0, "cancelling finalization");
            run.handle.cancel();
        }
        self.mapper = None;
        self.tracker = self.backend.new_tracker();
        self.motion.reset();
        self.keyframes = KeyframeStore::new(self.config.max_num_keyframes);
        self.artifact = None;
        self.initial_pose = None;
        self.current_pose = None;
        self.not_available_streak = 0;
        self.failure_streak = 0;
        self.tracking_lost.clear();
        self.roaming.clear();
        self.feedback = None;
        self.history.clear();
        self.stats = CaptureStatistics::default();
    }

    /// Raise or clear an advisory, reporting only edges.
    pub(super) fn update_advisory(&mut self, advisory: Advisory, condition: bool) {
        let latch = match advisory {
            Advisory::TrackingLost => &mut self.tracking_lost,
            Advisory::RoamingTooFar => &mut self.roaming,
        };
        match latch.update(condition) {
            Some(true) => {
                warn!(?advisory, "advisory raised");
                self.emit(CaptureEvent::AdvisoryRaised(advisory));
            }
            Some(false) => {
                info!(?advisory, "advisory cleared");
                self.emit(CaptureEvent::AdvisoryCleared(advisory));
            }
            None => {}
        }
    }

    pub(super) fn refresh_status(&mut self) {
        self.status.sensor = if !self.sensor_connected {
            SensorStatus::NeedsConnect
        } else if self.battery_low {
            SensorStatus::NeedsCharge
        } else {
            SensorStatus::Ok
        };
        self.status.background = if self.active_run.is_some() {
            BackgroundProcessingStatus::Finalizing
        } else {
            BackgroundProcessingStatus::Idle
        };
        let scanning = self.state == RoomCaptureState::Scanning;
        self.status.tracking_lost = scanning && self.tracking_lost.is_active();
        self.status.roaming_too_far = scanning && self.roaming.is_active();

        let message = self.status.message();
        if message != self.published_message {
            debug!(?message, "status message changed");
            self.published_message = message;
            self.emit(CaptureEvent::StatusChanged(message));
        }
    }

    pub(crate) fn publish_render(&self) {
        let camera_pose = match self.state {
            RoomCaptureState::PoseInitialization => Some(self.placement.camera_pose(&self.volume)),
            RoomCaptureState::Scanning => self
                .current_pose
                .map(|p| p.pose)
                .or(self.initial_pose),
            _ => None,
        };
        let snapshot = RenderSnapshot {
            state: self.state,
            camera_pose,
            volume_feedback: match self.state {
                RoomCaptureState::PoseInitialization => self.feedback.clone(),
                _ => None,
            },
            mesh: match self.state {
                RoomCaptureState::Viewing => self.artifact.as_ref().map(|a| a.current().clone()),
                _ => None,
            },
            color_preview: self.color_preview.clone(),
        };
        *self.render.write() = snapshot;
    }
}

impl Drop for CaptureCore {
    fn drop(&mut self) {
        if let Some(run) = self.active_run.take() {
            run.handle.cancel();
        }
    }
}
