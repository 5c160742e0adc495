//! Per-frame pose tracking.
//!
//! - `PoseTracker` trait: depth frame + prior pose in, refined pose + quality out
//! - `IcpTracker`: default frame-to-frame point-to-plane ICP implementation
//! - `MotionModel`: per-frame rotation speed and translation, used by keyframe selection

pub mod icp;
pub mod motion_model;
pub mod result;
pub mod state;
pub mod tracker;

pub use motion_model::{MotionModel, MotionSample};
pub use result::{TrackingMetrics, TrackingOutcome};
pub use state::{TrackerPose, TrackingQuality};
pub use tracker::{IcpTracker, PoseTracker};
