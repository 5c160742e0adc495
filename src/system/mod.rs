//! Room capture state machine and session orchestration.
//!
//! `CaptureStateMachine` is the public handle. It owns the shared state
//! (`CaptureCore` behind a mutex), spawns finalization workers and publishes
//! status, events and render snapshots.

mod backend;
mod capture_system;
mod completion;
mod capture_core;
mod dispatch;
pub mod intents;
pub mod messages;
pub mod placement;
pub mod shared_state;
pub mod state;
pub mod stats;
pub mod status;

pub use backend::{CaptureBackend, DefaultBackend};
pub use capture_system::CaptureStateMachine;
pub use dispatch::FrameOutcome;
pub use intents::UserIntent;
pub use messages::{Advisory, CaptureEvent, MeshVariant};
pub use placement::{PlacementEstimator, VolumeFeedback};
pub use shared_state::RenderSnapshot;
pub use state::RoomCaptureState;
pub use stats::CaptureStatistics;
pub use status::{AppStatus, BackgroundProcessingStatus, SensorStatus, StatusMessage, WarningLatch};
