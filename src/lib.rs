pub mod config;
pub mod error;
pub mod finalization;
pub mod geometry;
pub mod io;
pub mod keyframes;
pub mod mapping;
pub mod mesh;
pub mod sensor;
pub mod system;
pub mod tracking;

pub use config::CaptureSessionConfig;
pub use system::{CaptureEvent, CaptureStateMachine, RoomCaptureState, UserIntent};
