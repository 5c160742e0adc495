//! Volume mapper: fuses tracked depth frames and extracts a mesh on demand.
//!
//! Fusion is append-only. A fused (depth, pose) pair cannot be retracted;
//! starting over means dropping the mapper and creating a new one.

use tracing::debug;

use crate::config::MapperSettings;
use crate::error::FinalizeError;
use crate::finalization::CancelToken;
use crate::geometry::SE3;
use crate::mapping::ScanVolume;
use crate::mapping::surface_nets;
use crate::mapping::tsdf::TsdfGrid;
use crate::mesh::TriangleMesh;
use crate::sensor::DepthFrame;

/// Fuses depth frames into a bounded volumetric representation.
pub trait VolumeMapper: Send + Sync {
    fn volume(&self) -> &ScanVolume;

    fn integrate(&mut self, depth: &DepthFrame, pose: &SE3);

    fn frames_integrated(&self) -> usize;

    /// Polygonize the fused volume. Checks `cancel` while working.
    fn extract_mesh(&self, cancel: &CancelToken) -> Result<TriangleMesh, FinalizeError>;
}

/// TSDF mapper with surface-nets extraction.
pub struct TsdfMapper {
    grid: TsdfGrid,
    settings: MapperSettings,
    frames: usize,
}

impl TsdfMapper {
    pub fn new(volume: ScanVolume, settings: MapperSettings) -> Self {
        Self {
            grid: TsdfGrid::new(volume, &settings),
            settings,
            frames: 0,
        }
    }

    pub fn grid(&self) -> &TsdfGrid {
        &self.grid
    }
}

impl VolumeMapper for TsdfMapper {
    fn volume(&self) -> &ScanVolume {
        self.grid.volume()
    }

    fn integrate(&mut self, depth: &DepthFrame, pose: &SE3) {
        let updates = self.grid.integrate(depth, pose, &self.settings);
        self.frames += 1;
        debug!(frame = self.frames, updates, bricks = self.grid.num_bricks(), "fused depth frame");
    }

    fn frames_integrated(&self) -> usize {
        self.frames
    }

    fn extract_mesh(&self, cancel: &CancelToken) -> Result<TriangleMesh, FinalizeError> {
        surface_nets::extract(&self.grid, cancel)
    }
}
