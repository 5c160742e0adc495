//! Starting finalization runs and applying their stage completions.
//!
//! Completions arrive on the worker thread and are applied under the session
//! mutex. A completion whose run id no longer matches the active run belongs
//! to an abandoned run and is dropped.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::FinalizeError;
use crate::finalization::{
    FinalizationEvent, FinalizationHandle, FinalizationRequest, FinalizationSink, MeshSource, RunId,
};
use crate::keyframes::KeyframeRecord;
use crate::mesh::{ColorizationQuality, MeshArtifact};
use crate::system::RoomCaptureState;
use crate::system::capture_core::CaptureCore;
use crate::system::messages::{CaptureEvent, MeshVariant};

/// The run currently owned by the core and the stages the viewer waits on.
pub(crate) struct ActiveRun {
    pub(crate) handle: FinalizationHandle,
    awaiting_extraction: bool,
    awaiting_hole_filling: bool,
    awaiting_preview: bool,
}

impl ActiveRun {
    /// Viewing may start once these stages have reported.
    fn ready_to_view(&self) -> bool {
        !self.awaiting_extraction && !self.awaiting_hole_filling && !self.awaiting_preview
    }

    fn note(&mut self, event: &FinalizationEvent) {
        match event {
            FinalizationEvent::MeshExtracted(_) => self.awaiting_extraction = false,
            FinalizationEvent::HoleFilled(_) | FinalizationEvent::HoleFillingFailed(_) => {
                self.awaiting_hole_filling = false
            }
            FinalizationEvent::ColorPreview(_) | FinalizationEvent::ColorizationFailed { .. } => {
                self.awaiting_preview = false
            }
            _ => {}
        }
    }
}

impl CaptureCore {
    /// Freeze the scan and extract its mesh in the background.
    pub(super) fn begin_finalization(&mut self) {
        let hole_filling = self.hole_filling_requested;
        let colorization = self.colorization_requested;
        let Some(mapper) = self.mapper.take() else {
            self.transition(RoomCaptureState::Finalizing);
            self.abort_scan(FinalizeError::EmptyVolume);
            return;
        };

        info!(
            frames = mapper.frames_integrated(),
            keyframes = self.keyframes.len(),
            hole_filling,
            colorization,
            "finalizing scan"
        );
        self.transition(RoomCaptureState::Finalizing);
        if let Err(e) = self.start_run(MeshSource::Volume(mapper), hole_filling, colorization, true) {
            self.abort_scan(FinalizeError::StageFailed {
                stage: "extraction",
                reason: e.to_string(),
            });
        }
    }

    pub(super) fn start_run(
        &mut self,
        source: MeshSource,
        hole_filling: bool,
        colorization: bool,
        extracting: bool,
    ) -> std::io::Result<()> {
        let run = RunId(self.next_run);
        self.next_run += 1;
        let keyframes: Arc<[KeyframeRecord]> = self.keyframes.records().into();
        let request = FinalizationRequest {
            run,
            source,
            hole_filling,
            colorization,
            keyframes,
        };

        let handle = self.pipeline.spawn(request, self.finalization_sink())?;
        debug!(run = run.0, "finalization run started");
        self.active_run = Some(ActiveRun {
            handle,
            awaiting_extraction: extracting,
            awaiting_hole_filling: hole_filling,
            awaiting_preview: colorization,
        });
        self.refresh_status();
        Ok(())
    }

    fn finalization_sink(&self) -> FinalizationSink {
        let shared = self.shared.clone();
        Box::new(move |run, event| {
            if let Some(shared) = shared.upgrade() {
                shared.apply_finalization(run, event);
            }
        })
    }

    /// Extraction failed: no partial mesh survives, the user starts over.
    fn abort_scan(&mut self, error: FinalizeError) {
        error!(%error, "mesh extraction failed, scan discarded");
        self.emit(CaptureEvent::ExtractionFailed(error));
        self.discard_scan();
        self.transition(RoomCaptureState::PoseInitialization);
    }

    fn skip_stage(&mut self, stage: &'static str, error: FinalizeError) {
        warn!(stage, %error, "finalization stage skipped, keeping previous mesh");
        if let Some(artifact) = self.artifact.as_mut() {
            artifact.warnings.push(format!("{stage}: {error}"));
        }
        self.emit(CaptureEvent::StageSkipped { stage, error });
    }

    pub(crate) fn on_finalization_event(&mut self, run: RunId, event: FinalizationEvent) {
        let active = self.active_run.as_ref().map(|a| a.handle.run());
        if active != Some(run) {
            debug!(run = run.0, event = event.name(), "dropping result of abandoned run");
            return;
        }
        if let Some(active) = self.active_run.as_mut() {
            active.note(&event);
        }

        match event {
            FinalizationEvent::MeshExtracted(mesh) => {
                self.artifact = Some(MeshArtifact::shared(mesh));
                self.emit(CaptureEvent::MeshUpdated(MeshVariant::Extracted));
            }
            FinalizationEvent::ExtractionFailed(error) => {
                self.active_run = None;
                self.abort_scan(error);
                return;
            }
            FinalizationEvent::HoleFilled(mesh) => {
                if let Some(artifact) = self.artifact.as_mut() {
                    artifact.hole_filled = Some(mesh);
                    // Colors belong to the geometry they were computed on.
                    artifact.colorized = None;
                    artifact.color_quality = None;
                }
                self.emit(CaptureEvent::MeshUpdated(MeshVariant::HoleFilled));
            }
            FinalizationEvent::HoleFillingFailed(error) => self.skip_stage("hole_filling", error),
            FinalizationEvent::ColorPreview(mesh) => {
                if let Some(artifact) = self.artifact.as_mut() {
                    artifact.colorized = Some(mesh);
                    artifact.color_quality = Some(ColorizationQuality::Preview);
                }
                self.emit(CaptureEvent::MeshUpdated(MeshVariant::ColorPreview));
            }
            FinalizationEvent::ColorEnhanced(mesh) => {
                if let Some(artifact) = self.artifact.as_mut() {
                    artifact.colorized = Some(mesh);
                    artifact.color_quality = Some(ColorizationQuality::Enhanced);
                }
                self.emit(CaptureEvent::MeshUpdated(MeshVariant::ColorEnhanced));
            }
            FinalizationEvent::ColorizationFailed { error, .. } => self.skip_stage("colorization", error),
            FinalizationEvent::Completed => {
                info!(run = run.0, "finalization finished");
                self.active_run = None;
                self.emit(CaptureEvent::FinalizationFinished);
            }
        }

        let ready = self.active_run.as_ref().is_none_or(ActiveRun::ready_to_view);
        if self.state == RoomCaptureState::Finalizing && self.artifact.is_some() && ready {
            self.transition(RoomCaptureState::Viewing);
        }
        self.refresh_status();
        self.publish_render();
    }
}
