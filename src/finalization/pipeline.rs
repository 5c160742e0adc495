//! Finalization pipeline: extraction, hole filling, colorization.
//!
//! A run executes on its own worker thread. Each stage completion is handed
//! to a sink tagged with the run id, so the owner can drop results of runs
//! it has since abandoned. Stage order is fixed:
//!
//! 1. mesh extraction (fatal on failure, the run ends)
//! 2. hole filling, if requested (failure falls back to the extracted mesh)
//! 3. colorization preview then enhanced, if requested (failure keeps the
//!    uncolored mesh; an enhanced failure keeps the preview)

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::error::FinalizeError;
use crate::finalization::CancelToken;
use crate::keyframes::KeyframeRecord;
use crate::mapping::VolumeMapper;
use crate::mesh::colorize::spawn_colorization;
use crate::mesh::{Colorizer, HoleFiller, TriangleMesh};

/// Identifies one finalization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

/// Where the run gets its geometry from.
pub enum MeshSource {
    /// Extract from the frozen volume. The mapper is consumed by the run.
    Volume(Box<dyn VolumeMapper>),
    /// Post-process an already finalized mesh.
    Mesh(Arc<TriangleMesh>),
}

pub struct FinalizationRequest {
    pub run: RunId,
    pub source: MeshSource,
    pub hole_filling: bool,
    pub colorization: bool,
    pub keyframes: Arc<[KeyframeRecord]>,
}

/// Stage completion reported to the sink.
#[derive(Debug, Clone)]
pub enum FinalizationEvent {
    MeshExtracted(Arc<TriangleMesh>),
    ExtractionFailed(FinalizeError),
    HoleFilled(Arc<TriangleMesh>),
    HoleFillingFailed(FinalizeError),
    ColorPreview(Arc<TriangleMesh>),
    ColorEnhanced(Arc<TriangleMesh>),
    /// `preview_delivered` tells whether a preview was already reported.
    ColorizationFailed {
        error: FinalizeError,
        preview_delivered: bool,
    },
    /// All stages done. Not sent after an extraction failure or a cancel.
    Completed,
}

impl FinalizationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MeshExtracted(_) => "mesh_extracted",
            Self::ExtractionFailed(_) => "extraction_failed",
            Self::HoleFilled(_) => "hole_filled",
            Self::HoleFillingFailed(_) => "hole_filling_failed",
            Self::ColorPreview(_) => "color_preview",
            Self::ColorEnhanced(_) => "color_enhanced",
            Self::ColorizationFailed { .. } => "colorization_failed",
            Self::Completed => "completed",
        }
    }
}

/// Receives stage completions on the worker thread.
pub type FinalizationSink = Box<dyn Fn(RunId, FinalizationEvent) + Send>;

/// Owns the pluggable post-processing stages.
#[derive(Clone)]
pub struct FinalizationPipeline {
    hole_filler: Arc<dyn HoleFiller>,
    colorizer: Arc<dyn Colorizer>,
}

impl FinalizationPipeline {
    pub fn new(hole_filler: Arc<dyn HoleFiller>, colorizer: Arc<dyn Colorizer>) -> Self {
        Self {
            hole_filler,
            colorizer,
        }
    }

    /// Start a run on a new worker thread.
    pub fn spawn(
        &self,
        request: FinalizationRequest,
        sink: FinalizationSink,
    ) -> std::io::Result<FinalizationHandle> {
        let cancel = CancelToken::new();
        let run = request.run;
        let worker = Worker {
            hole_filler: self.hole_filler.clone(),
            colorizer: self.colorizer.clone(),
            cancel: cancel.clone(),
            sink,
        };
        let handle = thread::Builder::new()
            .name(format!("finalize-{}", run.0))
            .spawn(move || worker.run(request))?;
        Ok(FinalizationHandle {
            run,
            cancel,
            handle: Some(handle),
        })
    }
}

/// Owner-side handle on a running finalization.
pub struct FinalizationHandle {
    run: RunId,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl FinalizationHandle {
    pub fn run(&self) -> RunId {
        self.run
    }

    /// Ask the worker to stop. Results it still reports carry a stale run id.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker thread.
    ///
    /// Must not be called while holding a lock the sink takes.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Worker {
    hole_filler: Arc<dyn HoleFiller>,
    colorizer: Arc<dyn Colorizer>,
    cancel: CancelToken,
    sink: FinalizationSink,
}

impl Worker {
    fn emit(&self, run: RunId, event: FinalizationEvent) {
        debug!(run = run.0, event = event.name(), "finalization stage event");
        (self.sink)(run, event);
    }

    fn run(self, request: FinalizationRequest) {
        let FinalizationRequest {
            run,
            source,
            hole_filling,
            colorization,
            keyframes,
        } = request;
        info!(run = run.0, hole_filling, colorization, keyframes = keyframes.len(), "finalization started");

        let mut mesh = match source {
            MeshSource::Volume(mapper) => {
                let extracted = mapper.extract_mesh(&self.cancel);
                // The volume is no longer needed once polygonized.
                drop(mapper);
                match extracted {
                    Ok(mesh) if !mesh.is_empty() => {
                        info!(run = run.0, vertices = mesh.num_vertices(), triangles = mesh.num_triangles(), "mesh extracted");
                        let mesh = Arc::new(mesh);
                        self.emit(run, FinalizationEvent::MeshExtracted(mesh.clone()));
                        mesh
                    }
                    Ok(_) => {
                        warn!(run = run.0, "extraction produced an empty mesh");
                        self.emit(run, FinalizationEvent::ExtractionFailed(FinalizeError::EmptyVolume));
                        return;
                    }
                    Err(FinalizeError::Cancelled) => {
                        debug!(run = run.0, "extraction cancelled");
                        return;
                    }
                    Err(e) => {
                        warn!(run = run.0, error = %e, "mesh extraction failed");
                        self.emit(run, FinalizationEvent::ExtractionFailed(e));
                        return;
                    }
                }
            }
            MeshSource::Mesh(mesh) => mesh,
        };

        if hole_filling {
            match self.hole_filler.fill(&mesh, &self.cancel) {
                Ok(filled) => {
                    let filled = Arc::new(filled);
                    self.emit(run, FinalizationEvent::HoleFilled(filled.clone()));
                    mesh = filled;
                }
                Err(FinalizeError::Cancelled) => return,
                Err(e) => {
                    warn!(run = run.0, error = %e, "hole filling failed, keeping unfilled mesh");
                    self.emit(run, FinalizationEvent::HoleFillingFailed(e));
                }
            }
        }

        if colorization && !self.colorize(run, mesh, keyframes) {
            return;
        }

        if self.cancel.is_cancelled() {
            return;
        }
        info!(run = run.0, "finalization completed");
        self.emit(run, FinalizationEvent::Completed);
    }

    /// Returns false if the run was cancelled.
    fn colorize(&self, run: RunId, mesh: Arc<TriangleMesh>, keyframes: Arc<[KeyframeRecord]>) -> bool {
        let mut task = spawn_colorization(self.colorizer.clone(), mesh, keyframes, self.cancel.clone());

        let preview = match task.first_result() {
            Ok(preview) => preview,
            Err(FinalizeError::Cancelled) => return false,
            Err(error) => {
                warn!(run = run.0, %error, "colorization failed, keeping uncolored mesh");
                self.emit(
                    run,
                    FinalizationEvent::ColorizationFailed {
                        error,
                        preview_delivered: false,
                    },
                );
                return true;
            }
        };
        self.emit(run, FinalizationEvent::ColorPreview(Arc::new(preview)));

        match task.second_result() {
            Ok(enhanced) => {
                self.emit(run, FinalizationEvent::ColorEnhanced(Arc::new(enhanced)));
                true
            }
            Err(FinalizeError::Cancelled) => false,
            Err(error) => {
                warn!(run = run.0, %error, "enhanced colorization failed, keeping preview");
                self.emit(
                    run,
                    FinalizationEvent::ColorizationFailed {
                        error,
                        preview_delivered: true,
                    },
                );
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crossbeam_channel::{Receiver, unbounded};
    use nalgebra::Vector3;

    use crate::mapping::ScanVolume;
    use crate::mesh::ColorizationQuality;

    struct FixedMapper {
        volume: ScanVolume,
        mesh: Result<TriangleMesh, FinalizeError>,
    }

    impl VolumeMapper for FixedMapper {
        fn volume(&self) -> &ScanVolume {
            &self.volume
        }
        fn integrate(&mut self, _: &crate::sensor::DepthFrame, _: &crate::geometry::SE3) {}
        fn frames_integrated(&self) -> usize {
            0
        }
        fn extract_mesh(&self, _: &CancelToken) -> Result<TriangleMesh, FinalizeError> {
            self.mesh.clone()
        }
    }

    struct FailingFiller;

    impl HoleFiller for FailingFiller {
        fn fill(&self, _: &TriangleMesh, _: &CancelToken) -> Result<TriangleMesh, FinalizeError> {
            Err(FinalizeError::StageFailed {
                stage: "hole_filling",
                reason: "boom".to_string(),
            })
        }
    }

    struct TagColorizer;

    impl Colorizer for TagColorizer {
        fn colorize(
            &self,
            mesh: &TriangleMesh,
            _: &[KeyframeRecord],
            quality: ColorizationQuality,
            _: &CancelToken,
        ) -> Result<TriangleMesh, FinalizeError> {
            let rgb = match quality {
                ColorizationQuality::Preview => [1, 1, 1],
                ColorizationQuality::Enhanced => [2, 2, 2],
            };
            let mut out = mesh.clone();
            out.colors = Some(vec![rgb; mesh.num_vertices()]);
            Ok(out)
        }
    }

    fn triangle() -> TriangleMesh {
        TriangleMesh::new(
            vec![Vector3::zeros(), Vector3::x(), Vector3::y()],
            vec![[0, 1, 2]],
        )
    }

    fn run(
        pipeline: &FinalizationPipeline,
        mesh: Result<TriangleMesh, FinalizeError>,
        hole_filling: bool,
        colorization: bool,
    ) -> Receiver<(RunId, FinalizationEvent)> {
        let (tx, rx) = unbounded();
        let request = FinalizationRequest {
            run: RunId(7),
            source: MeshSource::Volume(Box::new(FixedMapper {
                volume: ScanVolume::unconfirmed(),
                mesh,
            })),
            hole_filling,
            colorization,
            keyframes: Arc::from(Vec::<KeyframeRecord>::new()),
        };
        let handle = pipeline
            .spawn(request, Box::new(move |run, event| {
                let _ = tx.send((run, event));
            }))
            .unwrap();
        handle.join();
        rx
    }

    fn names(rx: &Receiver<(RunId, FinalizationEvent)>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Ok((run, event)) = rx.recv_timeout(Duration::from_millis(100)) {
            assert_eq!(run, RunId(7));
            out.push(event.name());
        }
        out
    }

    #[test]
    fn test_extraction_failure_ends_run() {
        let pipeline = FinalizationPipeline::new(Arc::new(FailingFiller), Arc::new(TagColorizer));
        let rx = run(&pipeline, Err(FinalizeError::EmptyVolume), true, true);
        assert_eq!(names(&rx), vec!["extraction_failed"]);
    }

    #[test]
    fn test_empty_mesh_is_extraction_failure() {
        let pipeline = FinalizationPipeline::new(Arc::new(FailingFiller), Arc::new(TagColorizer));
        let rx = run(&pipeline, Ok(TriangleMesh::default()), false, false);
        assert_eq!(names(&rx), vec!["extraction_failed"]);
    }

    #[test]
    fn test_hole_fill_failure_falls_back_and_colorizes() {
        let pipeline = FinalizationPipeline::new(Arc::new(FailingFiller), Arc::new(TagColorizer));
        let rx = run(&pipeline, Ok(triangle()), true, true);
        let events: Vec<FinalizationEvent> = rx.try_iter().map(|(_, e)| e).collect();
        let names: Vec<_> = events.iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["mesh_extracted", "hole_filling_failed", "color_preview", "color_enhanced", "completed"]
        );
        match &events[3] {
            FinalizationEvent::ColorEnhanced(mesh) => {
                // Colored on top of the extracted geometry.
                assert_eq!(mesh.num_triangles(), 1);
                assert_eq!(mesh.colors.as_ref().unwrap()[0], [2, 2, 2]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_real_stages_without_keyframes() {
        let pipeline = FinalizationPipeline::new(
            Arc::new(crate::mesh::BoundaryFanFiller::default()),
            Arc::new(crate::mesh::KeyframeColorizer::default()),
        );
        let rx = run(&pipeline, Ok(triangle()), true, true);
        let events: Vec<FinalizationEvent> = rx.try_iter().map(|(_, e)| e).collect();
        assert!(matches!(events[1], FinalizationEvent::HoleFilled(_)));
        assert!(matches!(
            events[2],
            FinalizationEvent::ColorizationFailed {
                error: FinalizeError::NoKeyframes,
                preview_delivered: false
            }
        ));
        assert!(matches!(events[3], FinalizationEvent::Completed));
    }
}
