//! Frame types delivered by the frame source.

use std::sync::Arc;

use nalgebra::Vector3;

/// Pinhole intrinsics of a depth (or registered color) image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: usize,
    pub height: usize,
}

impl CameraIntrinsics {
    /// Intrinsics for a given horizontal field of view, principal point at the center.
    pub fn from_fov(width: usize, height: usize, hfov_deg: f64) -> Self {
        let fx = (width as f64 / 2.0) / (hfov_deg.to_radians() / 2.0).tan();
        Self {
            fx,
            fy: fx,
            cx: (width as f64 - 1.0) / 2.0,
            cy: (height as f64 - 1.0) / 2.0,
            width,
            height,
        }
    }

    /// Back-project pixel (u, v) at metric depth into the camera frame.
    #[inline]
    pub fn unproject(&self, u: f64, v: f64, depth: f64) -> Vector3<f64> {
        Vector3::new(
            (u - self.cx) * depth / self.fx,
            (v - self.cy) * depth / self.fy,
            depth,
        )
    }

    /// Project a camera-frame point. Returns `None` behind the camera.
    #[inline]
    pub fn project(&self, p: &Vector3<f64>) -> Option<(f64, f64)> {
        if p.z <= 1e-6 {
            return None;
        }
        Some((
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }

    /// Project and round to a pixel inside the image.
    #[inline]
    pub fn project_to_pixel(&self, p: &Vector3<f64>) -> Option<(usize, usize)> {
        let (u, v) = self.project(p)?;
        let (ui, vi) = (u.round(), v.round());
        if ui < 0.0 || vi < 0.0 || ui >= self.width as f64 || vi >= self.height as f64 {
            return None;
        }
        Some((ui as usize, vi as usize))
    }
}

/// Metric depth image. Invalid pixels are `0.0` or non-finite.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub intrinsics: CameraIntrinsics,
    /// Row-major depth in meters.
    pub depth: Arc<[f32]>,
}

impl DepthFrame {
    pub fn new(intrinsics: CameraIntrinsics, depth: Vec<f32>) -> Self {
        Self {
            intrinsics,
            depth: depth.into(),
        }
    }

    pub fn width(&self) -> usize {
        self.intrinsics.width
    }

    pub fn height(&self) -> usize {
        self.intrinsics.height
    }

    /// Buffer length agrees with the declared dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.depth.len() == self.intrinsics.width * self.intrinsics.height
    }

    /// Depth at (u, v) if valid.
    #[inline]
    pub fn at(&self, u: usize, v: usize) -> Option<f32> {
        let d = *self.depth.get(v * self.intrinsics.width + u)?;
        (d.is_finite() && d > 0.0).then_some(d)
    }

    /// Camera-frame point at (u, v) if the depth is valid.
    #[inline]
    pub fn point_at(&self, u: usize, v: usize) -> Option<Vector3<f64>> {
        self.at(u, v)
            .map(|d| self.intrinsics.unproject(u as f64, v as f64, f64::from(d)))
    }

    pub fn valid_pixel_count(&self) -> usize {
        self.depth.iter().filter(|d| d.is_finite() && **d > 0.0).count()
    }
}

/// RGB image, row-major, 8 bits per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<[u8; 3]>,
}

impl ColorImage {
    pub fn new(width: usize, height: usize, pixels: Vec<[u8; 3]>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn filled(width: usize, height: usize, rgb: [u8; 3]) -> Self {
        Self::new(width, height, vec![rgb; width * height])
    }

    #[inline]
    pub fn get(&self, u: usize, v: usize) -> Option<[u8; 3]> {
        if u >= self.width || v >= self.height {
            return None;
        }
        self.pixels.get(v * self.width + u).copied()
    }
}

/// Color image with the intrinsics of the viewpoint it was captured from.
#[derive(Debug, Clone)]
pub struct ColorFrame {
    pub intrinsics: CameraIntrinsics,
    pub image: Arc<ColorImage>,
}

/// Synchronized depth + optional color delivered by the frame source.
#[derive(Debug, Clone)]
pub struct FramePair {
    /// Capture time in seconds.
    pub timestamp: f64,
    pub depth: DepthFrame,
    pub color: Option<ColorFrame>,
    /// Battery low flag reported alongside the frame.
    pub needs_charge: bool,
}

impl FramePair {
    pub fn new(timestamp: f64, depth: DepthFrame, color: Option<ColorFrame>) -> Self {
        Self {
            timestamp,
            depth,
            color,
            needs_charge: false,
        }
    }
}

/// Out-of-band sensor notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorEvent {
    Connected,
    Disconnected,
    LowBattery,
    BatteryOk,
}
