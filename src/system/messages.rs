//! Events published by the capture core.
//!
//! Sent over an unbounded channel so the frame path never waits on a slow
//! consumer.

use crate::error::FinalizeError;
use crate::keyframes::KeyframeId;
use crate::mapping::ScanVolume;
use crate::system::{RoomCaptureState, StatusMessage};

/// Non-fatal conditions surfaced once per occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    TrackingLost,
    RoamingTooFar,
}

/// Which mesh variant a `MeshUpdated` event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshVariant {
    Extracted,
    HoleFilled,
    ColorPreview,
    ColorEnhanced,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    StateChanged {
        from: RoomCaptureState,
        to: RoomCaptureState,
    },
    /// The selected status message changed (`None` clears it).
    StatusChanged(Option<StatusMessage>),
    AdvisoryRaised(Advisory),
    AdvisoryCleared(Advisory),
    /// Tracking failed for too many consecutive frames; the scan was discarded.
    FatalTrackingError {
        consecutive_failures: usize,
    },
    /// Mesh extraction failed; the scan was discarded.
    ExtractionFailed(FinalizeError),
    /// An optional stage failed and its input was kept.
    StageSkipped {
        stage: &'static str,
        error: FinalizeError,
    },
    MeshUpdated(MeshVariant),
    KeyframeCaptured {
        id: KeyframeId,
        evicted: Option<KeyframeId>,
    },
    VolumeChanged(ScanVolume),
    /// A finalization run delivered all of its stages.
    FinalizationFinished,
}
