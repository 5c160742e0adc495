use nalgebra::Vector3;

/// Commands from the UI layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserIntent {
    StartScan,
    Done,
    Reset,
    /// Requested volume extent in meters; clamped by the sizing rules.
    SetVolumeSize(Vector3<f64>),
    /// Voxel size in meters.
    SetResolution(f64),
    RequestHoleFilling,
    RequestColorization,
}

impl UserIntent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartScan => "start_scan",
            Self::Done => "done",
            Self::Reset => "reset",
            Self::SetVolumeSize(_) => "set_volume_size",
            Self::SetResolution(_) => "set_resolution",
            Self::RequestHoleFilling => "request_hole_filling",
            Self::RequestColorization => "request_colorization",
        }
    }
}
