//! Sensor-facing data: depth/color frame pairs, intrinsics and sensor events.
//!
//! Frame delivery and driver management live outside this crate; these types
//! are the interface the capture core consumes.

pub mod depth_correction;
pub mod frame;

pub use depth_correction::median_correct_depth;
pub use frame::{CameraIntrinsics, ColorFrame, ColorImage, DepthFrame, FramePair, SensorEvent};
