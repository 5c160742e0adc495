//! State shared between the frame path, the intent path and finalization
//! workers.
//!
//! All capture state lives in one `CaptureCore` behind a mutex so transitions
//! are never observed half-applied. Render snapshots are published
//! separately so the display never waits on tracking or fusion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::trace;

use crate::finalization::{FinalizationEvent, RunId};
use crate::geometry::SE3;
use crate::mesh::TriangleMesh;
use crate::sensor::ColorImage;
use crate::system::capture_core::CaptureCore;
use crate::system::{RoomCaptureState, VolumeFeedback};

/// Consistent view for the render layer, replaced whole on every update.
#[derive(Debug, Clone, Default)]
pub struct RenderSnapshot {
    pub state: RoomCaptureState,
    /// Present in pose initialization and scanning.
    pub camera_pose: Option<SE3>,
    /// Present in pose initialization only.
    pub volume_feedback: Option<Arc<VolumeFeedback>>,
    /// Present in viewing only.
    pub mesh: Option<Arc<TriangleMesh>>,
    /// Latest color image, in every state.
    pub color_preview: Option<Arc<ColorImage>>,
}

pub struct SharedState {
    pub(crate) core: Mutex<CaptureCore>,
    /// Notified after every transition or applied stage completion.
    pub(crate) changed: Condvar,
    pub(crate) render: Arc<RwLock<RenderSnapshot>>,
}

impl SharedState {
    /// Apply a stage completion from a finalization worker.
    pub(crate) fn apply_finalization(&self, run: RunId, event: FinalizationEvent) {
        let mut core = self.core.lock();
        core.on_finalization_event(run, event);
        drop(core);
        self.changed.notify_all();
    }

    /// Block until `pred` holds for the core or `timeout` elapses.
    pub(crate) fn wait_until<F>(&self, timeout: Duration, mut pred: F) -> bool
    where
        F: FnMut(&CaptureCore) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut core = self.core.lock();
        while !pred(&core) {
            if self.changed.wait_until(&mut core, deadline).timed_out() {
                let done = pred(&core);
                trace!(done, "wait timed out");
                return done;
            }
        }
        true
    }
}
