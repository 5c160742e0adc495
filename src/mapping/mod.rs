//! Volumetric mapping.
//!
//! - `ScanVolume`: the bounded region being scanned
//! - `TsdfGrid`: sparse truncated signed distance storage
//! - `VolumeMapper` / `TsdfMapper`: fusion and on-demand mesh extraction

pub mod mapper;
pub mod surface_nets;
pub mod tsdf;
pub mod volume;

pub use mapper::{TsdfMapper, VolumeMapper};
pub use tsdf::TsdfGrid;
pub use volume::ScanVolume;
