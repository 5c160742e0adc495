//! Error types for the capture core.
//!
//! None of these are fatal to the process. Intent and frame errors are
//! advisory results for the caller; finalization errors are consumed by the
//! pipeline orchestrator and mapped to fallbacks or a forced reset.

use crate::system::RoomCaptureState;

/// Invalid `CaptureSessionConfig`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("hardware registered depth and expensive depth correction are mutually exclusive")]
    RegistrationConflict,

    #[error("{field} must be finite and positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("max_num_keyframes must be at least 1")]
    NoKeyframeCapacity,

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Why a user intent was turned into a no-op.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IntentError {
    #[error("intent {intent} is not valid in state {state:?}")]
    InvalidState {
        intent: &'static str,
        state: RoomCaptureState,
    },

    #[error("sensor is not ready")]
    SensorNotReady,

    #[error("color camera is not usable")]
    CameraUnavailable,

    #[error("scan volume has not been confirmed")]
    VolumeNotConfirmed,

    #[error("a finalization run is already active")]
    FinalizationActive,

    #[error("invalid value for {what}: {value}")]
    InvalidValue { what: &'static str, value: f64 },

    #[error("could not start background work: {0}")]
    WorkerUnavailable(String),
}

/// Why a delivered frame was not used for tracking or mapping.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum FrameRejection {
    #[error("frame dispatch is paused until the sensor recovers")]
    SensorPaused,

    #[error("timestamp {timestamp} is not after the last accepted {previous}")]
    OutOfOrder { timestamp: f64, previous: f64 },

    #[error("depth buffer size does not match its dimensions")]
    MalformedDepth,

    #[error("frames are not used for mapping in state {0:?}")]
    Frozen(RoomCaptureState),
}

/// Failure of a finalization stage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FinalizeError {
    #[error("finalization was cancelled")]
    Cancelled,

    #[error("the volume contains no fused surface")]
    EmptyVolume,

    #[error("the mesh has no triangles")]
    EmptyMesh,

    #[error("no keyframes available for colorization")]
    NoKeyframes,

    #[error("{stage} failed: {reason}")]
    StageFailed { stage: &'static str, reason: String },
}
