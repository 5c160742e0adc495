//! Capture session configuration.
//!
//! One value object, set once at startup and read-only afterwards. Every field
//! has a serde default so a partial TOML file is enough.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Process-wide options for a room capture session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureSessionConfig {
    /// Initial scanning volume size (x, y, z) in meters.
    #[serde(default = "defaults::initial_volume_size_m")]
    pub initial_volume_size_m: [f64; 3],

    /// Voxel size for `initial_volume_size_m`. Scaled with the volume width on resize.
    #[serde(default = "defaults::initial_volume_resolution_m")]
    pub initial_volume_resolution_m: f64,

    /// The ceiling is not likely to be very low.
    #[serde(default = "defaults::min_vertical_volume_size_m")]
    pub min_vertical_volume_size_m: f64,

    /// Keyframe store capacity. More won't fit in a single texture atlas.
    #[serde(default = "defaults::max_num_keyframes")]
    pub max_num_keyframes: usize,

    #[serde(default = "defaults::max_keyframe_rotation_deg")]
    pub max_keyframe_rotation_deg: f64,

    #[serde(default = "defaults::max_keyframe_translation_m")]
    pub max_keyframe_translation_m: f64,

    /// Frames rotating faster than this are never keyframes (motion blur, rolling shutter).
    #[serde(default = "defaults::max_keyframe_rotation_speed_deg_per_s")]
    pub max_keyframe_rotation_speed_deg_per_s: f64,

    /// Roaming advisory threshold, measured from the pose at which scanning began.
    #[serde(default = "defaults::max_distance_from_initial_position_m")]
    pub max_distance_from_initial_position_m: f64,

    /// Sensor-side depth-to-color registration. Frames reach the core already
    /// aligned either way, so the core only checks it against
    /// `apply_expensive_depth_correction`.
    #[serde(default = "defaults::enabled")]
    pub use_hardware_registered_depth: bool,

    /// Per-frame depth refinement. Requires `use_hardware_registered_depth = false`.
    #[serde(default)]
    pub apply_expensive_depth_correction: bool,

    /// Consecutive `NotAvailable` frames before the tracking-lost advisory.
    #[serde(default = "defaults::tracking_lost_warning_frames")]
    pub tracking_lost_warning_frames: usize,

    /// Consecutive failed frames that force a return to pose initialization.
    #[serde(default = "defaults::max_consecutive_tracking_failures")]
    pub max_consecutive_tracking_failures: usize,

    /// Finalize with whatever was mapped when the sensor disconnects mid-scan.
    #[serde(default)]
    pub finalize_on_sensor_disconnect: bool,

    /// Keep (timestamp, pose, quality) of every accepted scanning frame.
    #[serde(default = "defaults::enabled")]
    pub record_frame_history: bool,

    #[serde(default = "defaults::enabled")]
    pub status_messages_enabled: bool,

    #[serde(default)]
    pub tracker: TrackerSettings,

    #[serde(default)]
    pub mapper: MapperSettings,

    #[serde(default)]
    pub hole_filling: HoleFillingSettings,

    #[serde(default)]
    pub colorization: ColorizationSettings,
}

/// ICP tracker tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerSettings {
    #[serde(default = "defaults::icp_iterations")]
    pub max_iterations: usize,

    /// Sample every n-th pixel in both directions.
    #[serde(default = "defaults::icp_pixel_stride")]
    pub pixel_stride: usize,

    /// Correspondences further apart than this are discarded (meters).
    #[serde(default = "defaults::icp_max_correspondence_m")]
    pub max_correspondence_distance_m: f64,

    /// Normals must agree to within this angle.
    #[serde(default = "defaults::icp_max_normal_angle_deg")]
    pub max_normal_angle_deg: f64,

    #[serde(default = "defaults::icp_min_valid_pixels")]
    pub min_valid_pixels: usize,

    #[serde(default = "defaults::icp_min_correspondences")]
    pub min_correspondences: usize,

    /// Per-frame translation above this is excessive motion.
    #[serde(default = "defaults::icp_max_frame_translation_m")]
    pub max_frame_translation_m: f64,

    /// Per-frame rotation above this is excessive motion.
    #[serde(default = "defaults::icp_max_frame_rotation_deg")]
    pub max_frame_rotation_deg: f64,
}

/// TSDF mapper tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapperSettings {
    /// Truncation band half-width, in voxels.
    #[serde(default = "defaults::truncation_voxels")]
    pub truncation_voxels: f32,

    #[serde(default = "defaults::max_weight")]
    pub max_weight: f32,

    /// Integrate every n-th depth pixel.
    #[serde(default = "defaults::integration_stride")]
    pub integration_stride: usize,

    /// Depth beyond this is ignored (meters).
    #[serde(default = "defaults::max_depth_m")]
    pub max_depth_m: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HoleFillingSettings {
    /// Boundary loops with more edges than this are left open.
    #[serde(default = "defaults::max_hole_edges")]
    pub max_hole_edges: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColorizationSettings {
    /// Vertices seen at a grazing angle beyond this are not colored by a keyframe.
    #[serde(default = "defaults::max_view_angle_deg")]
    pub max_view_angle_deg: f64,

    /// Keyframes considered per vertex in the enhanced pass.
    #[serde(default = "defaults::enhanced_keyframes_per_vertex")]
    pub enhanced_keyframes_per_vertex: usize,
}

mod defaults {
    pub fn initial_volume_size_m() -> [f64; 3] {
        [10.0, 10.0, 10.0]
    }
    pub fn initial_volume_resolution_m() -> f64 {
        0.05 // coarse, but fast
    }
    pub fn min_vertical_volume_size_m() -> f64 {
        1.0
    }
    pub fn max_num_keyframes() -> usize {
        48
    }
    pub fn max_keyframe_rotation_deg() -> f64 {
        20.0
    }
    pub fn max_keyframe_translation_m() -> f64 {
        0.3
    }
    pub fn max_keyframe_rotation_speed_deg_per_s() -> f64 {
        1.0
    }
    pub fn max_distance_from_initial_position_m() -> f64 {
        1.0
    }
    pub fn enabled() -> bool {
        true
    }
    pub fn tracking_lost_warning_frames() -> usize {
        3
    }
    pub fn max_consecutive_tracking_failures() -> usize {
        30
    }
    pub fn icp_iterations() -> usize {
        12
    }
    pub fn icp_pixel_stride() -> usize {
        4
    }
    pub fn icp_max_correspondence_m() -> f64 {
        0.1
    }
    pub fn icp_max_normal_angle_deg() -> f64 {
        30.0
    }
    pub fn icp_min_valid_pixels() -> usize {
        200
    }
    pub fn icp_min_correspondences() -> usize {
        100
    }
    pub fn icp_max_frame_translation_m() -> f64 {
        0.15
    }
    pub fn icp_max_frame_rotation_deg() -> f64 {
        20.0
    }
    pub fn truncation_voxels() -> f32 {
        3.0
    }
    pub fn max_weight() -> f32 {
        64.0
    }
    pub fn integration_stride() -> usize {
        2
    }
    pub fn max_depth_m() -> f32 {
        8.0
    }
    pub fn max_hole_edges() -> usize {
        200
    }
    pub fn max_view_angle_deg() -> f64 {
        75.0
    }
    pub fn enhanced_keyframes_per_vertex() -> usize {
        4
    }
}

impl Default for CaptureSessionConfig {
    fn default() -> Self {
        Self {
            initial_volume_size_m: defaults::initial_volume_size_m(),
            initial_volume_resolution_m: defaults::initial_volume_resolution_m(),
            min_vertical_volume_size_m: defaults::min_vertical_volume_size_m(),
            max_num_keyframes: defaults::max_num_keyframes(),
            max_keyframe_rotation_deg: defaults::max_keyframe_rotation_deg(),
            max_keyframe_translation_m: defaults::max_keyframe_translation_m(),
            max_keyframe_rotation_speed_deg_per_s: defaults::max_keyframe_rotation_speed_deg_per_s(),
            max_distance_from_initial_position_m: defaults::max_distance_from_initial_position_m(),
            use_hardware_registered_depth: true,
            apply_expensive_depth_correction: false,
            tracking_lost_warning_frames: defaults::tracking_lost_warning_frames(),
            max_consecutive_tracking_failures: defaults::max_consecutive_tracking_failures(),
            finalize_on_sensor_disconnect: false,
            record_frame_history: true,
            status_messages_enabled: true,
            tracker: TrackerSettings::default(),
            mapper: MapperSettings::default(),
            hole_filling: HoleFillingSettings::default(),
            colorization: ColorizationSettings::default(),
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            max_iterations: defaults::icp_iterations(),
            pixel_stride: defaults::icp_pixel_stride(),
            max_correspondence_distance_m: defaults::icp_max_correspondence_m(),
            max_normal_angle_deg: defaults::icp_max_normal_angle_deg(),
            min_valid_pixels: defaults::icp_min_valid_pixels(),
            min_correspondences: defaults::icp_min_correspondences(),
            max_frame_translation_m: defaults::icp_max_frame_translation_m(),
            max_frame_rotation_deg: defaults::icp_max_frame_rotation_deg(),
        }
    }
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            truncation_voxels: defaults::truncation_voxels(),
            max_weight: defaults::max_weight(),
            integration_stride: defaults::integration_stride(),
            max_depth_m: defaults::max_depth_m(),
        }
    }
}

impl Default for HoleFillingSettings {
    fn default() -> Self {
        Self {
            max_hole_edges: defaults::max_hole_edges(),
        }
    }
}

impl Default for ColorizationSettings {
    fn default() -> Self {
        Self {
            max_view_angle_deg: defaults::max_view_angle_deg(),
            enhanced_keyframes_per_vertex: defaults::enhanced_keyframes_per_vertex(),
        }
    }
}

impl CaptureSessionConfig {
    /// Parse from TOML text and validate.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            basic_toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file from disk and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Check the cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.use_hardware_registered_depth && self.apply_expensive_depth_correction {
            return Err(ConfigError::RegistrationConflict);
        }
        if self.max_num_keyframes == 0 {
            return Err(ConfigError::NoKeyframeCapacity);
        }

        let positive = [
            ("initial_volume_size_m.x", self.initial_volume_size_m[0]),
            ("initial_volume_size_m.y", self.initial_volume_size_m[1]),
            ("initial_volume_size_m.z", self.initial_volume_size_m[2]),
            ("initial_volume_resolution_m", self.initial_volume_resolution_m),
            ("min_vertical_volume_size_m", self.min_vertical_volume_size_m),
            ("max_keyframe_rotation_deg", self.max_keyframe_rotation_deg),
            ("max_keyframe_translation_m", self.max_keyframe_translation_m),
            (
                "max_keyframe_rotation_speed_deg_per_s",
                self.max_keyframe_rotation_speed_deg_per_s,
            ),
            (
                "max_distance_from_initial_position_m",
                self.max_distance_from_initial_position_m,
            ),
            (
                "tracker.max_correspondence_distance_m",
                self.tracker.max_correspondence_distance_m,
            ),
            ("mapper.truncation_voxels", f64::from(self.mapper.truncation_voxels)),
            ("mapper.max_weight", f64::from(self.mapper.max_weight)),
            ("mapper.max_depth_m", f64::from(self.mapper.max_depth_m)),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { field, value });
            }
        }
        Ok(())
    }

    /// Keyframe rotation threshold in radians.
    pub fn max_keyframe_rotation_rad(&self) -> f64 {
        self.max_keyframe_rotation_deg.to_radians()
    }
}
