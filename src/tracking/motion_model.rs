//! Frame-to-frame motion measurement.

use crate::geometry::SE3;

/// Motion between two consecutive tracked frames.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionSample {
    pub rotation_deg: f64,
    pub translation_m: f64,
    pub dt_s: f64,
    /// Rotation speed in degrees per second; 0 for the first frame.
    pub rotation_speed_deg_per_s: f64,
}

/// Remembers the previous tracked pose to measure per-frame motion.
pub struct MotionModel {
    prev: Option<(SE3, f64)>,
}

impl MotionModel {
    pub fn new() -> Self {
        Self { prev: None }
    }

    /// Update the model with a new pose observation and return the motion since the last one.
    pub fn update(&mut self, pose: &SE3, timestamp: f64) -> MotionSample {
        let sample = match self.prev {
            Some((ref prev_pose, prev_ts)) => {
                let rotation_deg = prev_pose.angle_to(pose).to_degrees();
                let dt_s = timestamp - prev_ts;
                let rotation_speed_deg_per_s = if dt_s > 0.0 {
                    rotation_deg / dt_s
                } else {
                    f64::INFINITY
                };
                MotionSample {
                    rotation_deg,
                    translation_m: prev_pose.distance_to(pose),
                    dt_s,
                    rotation_speed_deg_per_s,
                }
            }
            None => MotionSample::default(),
        };
        self.prev = Some((*pose, timestamp));
        sample
    }

    pub fn last_pose(&self) -> Option<&SE3> {
        self.prev.as_ref().map(|(pose, _)| pose)
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}

impl Default for MotionModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    #[test]
    fn test_rotation_speed() {
        let mut model = MotionModel::new();
        let first = model.update(&SE3::identity(), 1.0);
        assert_eq!(first.rotation_speed_deg_per_s, 0.0);

        let turned = SE3::new(
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 3f64.to_radians()),
            Vector3::new(0.0, 0.0, 0.1),
        );
        let sample = model.update(&turned, 1.5);
        assert_relative_eq!(sample.rotation_deg, 3.0, epsilon = 1e-9);
        assert_relative_eq!(sample.rotation_speed_deg_per_s, 6.0, epsilon = 1e-9);
        assert_relative_eq!(sample.translation_m, 0.1, epsilon = 1e-12);
    }
}
