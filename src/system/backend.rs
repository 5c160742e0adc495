//! Factory for the per-scan components and the finalization stages.
//!
//! The capture core never builds trackers or mappers itself: a reset throws
//! the old instances away and asks the backend for fresh ones.

use std::sync::Arc;

use crate::config::CaptureSessionConfig;
use crate::mapping::{ScanVolume, TsdfMapper, VolumeMapper};
use crate::mesh::{BoundaryFanFiller, Colorizer, HoleFiller, KeyframeColorizer};
use crate::tracking::{IcpTracker, PoseTracker};

pub trait CaptureBackend: Send + Sync {
    fn new_tracker(&self) -> Box<dyn PoseTracker>;

    fn new_mapper(&self, volume: ScanVolume) -> Box<dyn VolumeMapper>;

    fn hole_filler(&self) -> Arc<dyn HoleFiller>;

    fn colorizer(&self) -> Arc<dyn Colorizer>;
}

/// ICP tracking, TSDF fusion, fan hole filling and keyframe colorization.
pub struct DefaultBackend {
    config: Arc<CaptureSessionConfig>,
}

impl DefaultBackend {
    pub fn new(config: Arc<CaptureSessionConfig>) -> Self {
        Self { config }
    }
}

impl CaptureBackend for DefaultBackend {
    fn new_tracker(&self) -> Box<dyn PoseTracker> {
        Box::new(IcpTracker::new(self.config.tracker.clone()))
    }

    fn new_mapper(&self, volume: ScanVolume) -> Box<dyn VolumeMapper> {
        Box::new(TsdfMapper::new(volume, self.config.mapper.clone()))
    }

    fn hole_filler(&self) -> Arc<dyn HoleFiller> {
        Arc::new(BoundaryFanFiller::new(self.config.hole_filling.clone()))
    }

    fn colorizer(&self) -> Arc<dyn Colorizer> {
        Arc::new(KeyframeColorizer::new(self.config.colorization.clone()))
    }
}
