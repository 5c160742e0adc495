//! Frame sources usable without hardware.

pub mod synthetic;

pub use synthetic::{Aabb, SyntheticRoom};
