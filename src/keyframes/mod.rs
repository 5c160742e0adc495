//! Keyframe selection and bounded storage, used later to colorize the mesh.

pub mod decision;
pub mod store;

pub use decision::{AcceptReason, KeyframeDecision, KeyframeSelector, RejectReason};
pub use store::{KeyframeId, KeyframeRecord, KeyframeStore};
