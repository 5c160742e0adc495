use std::fmt;

/// Phase of a room capture session.
///
/// The only transitions are the cycle
/// `PoseInitialization -> Scanning -> Finalizing -> Viewing -> PoseInitialization`
/// plus a forced return to `PoseInitialization` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoomCaptureState {
    /// Placing the volume; tracker and mapper are idle.
    #[default]
    PoseInitialization,
    /// Tracking and fusing every frame.
    Scanning,
    /// Mesh extraction and post-processing in the background.
    Finalizing,
    /// Inspecting the finished mesh.
    Viewing,
}

impl RoomCaptureState {
    pub fn name(self) -> &'static str {
        match self {
            Self::PoseInitialization => "pose_initialization",
            Self::Scanning => "scanning",
            Self::Finalizing => "finalizing",
            Self::Viewing => "viewing",
        }
    }

    /// Whether `self -> to` is part of the capture cycle.
    pub fn can_advance_to(self, to: RoomCaptureState) -> bool {
        matches!(
            (self, to),
            (Self::PoseInitialization, Self::Scanning)
                | (Self::Scanning, Self::Finalizing)
                | (Self::Finalizing, Self::Viewing)
                | (_, Self::PoseInitialization)
        )
    }
}

impl fmt::Display for RoomCaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
