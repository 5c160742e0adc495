//! User-facing status model.
//!
//! `AppStatus` is recomputed by the capture core after every event. The
//! status reporter only reads the selected `StatusMessage`.

/// Sensor availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorStatus {
    #[default]
    Ok,
    NeedsConnect,
    NeedsCharge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackgroundProcessingStatus {
    #[default]
    Idle,
    Finalizing,
}

/// Fixed set of messages the status reporter can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusMessage {
    NeedCameraAccess,
    NeedCalibratedCamera,
    ConnectSensor,
    ChargeSensor,
    Finalizing,
    TrackingLost,
    RoamingTooFar,
}

impl StatusMessage {
    pub fn text(self) -> &'static str {
        match self {
            Self::NeedCameraAccess => {
                "This app requires camera access to capture rooms.\nAllow access in the system privacy settings."
            }
            Self::NeedCalibratedCamera => "This app requires a device with a calibrated color camera.",
            Self::ConnectSensor => "Please connect the depth sensor.",
            Self::ChargeSensor => "Please charge the depth sensor.",
            Self::Finalizing => "Finalizing model...",
            Self::TrackingLost => "Tracking lost. Move back to a scanned area or press Reset.",
            Self::RoamingTooFar => "Please stay closer to the position where scanning started.",
        }
    }
}

/// Inputs the status message is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppStatus {
    pub sensor: SensorStatus,
    pub background: BackgroundProcessingStatus,
    pub camera_authorized: bool,
    pub camera_calibrated: bool,
    pub tracking_lost: bool,
    pub roaming_too_far: bool,
    pub messages_enabled: bool,
}

impl Default for AppStatus {
    fn default() -> Self {
        Self {
            sensor: SensorStatus::Ok,
            background: BackgroundProcessingStatus::Idle,
            camera_authorized: true,
            camera_calibrated: true,
            tracking_lost: false,
            roaming_too_far: false,
            messages_enabled: true,
        }
    }
}

impl AppStatus {
    /// Highest priority message for the current status, if any.
    pub fn message(&self) -> Option<StatusMessage> {
        if !self.messages_enabled {
            return None;
        }
        if !self.camera_authorized {
            Some(StatusMessage::NeedCameraAccess)
        } else if !self.camera_calibrated {
            Some(StatusMessage::NeedCalibratedCamera)
        } else if self.sensor == SensorStatus::NeedsConnect {
            Some(StatusMessage::ConnectSensor)
        } else if self.sensor == SensorStatus::NeedsCharge {
            Some(StatusMessage::ChargeSensor)
        } else if self.background == BackgroundProcessingStatus::Finalizing {
            Some(StatusMessage::Finalizing)
        } else if self.tracking_lost {
            Some(StatusMessage::TrackingLost)
        } else if self.roaming_too_far {
            Some(StatusMessage::RoamingTooFar)
        } else {
            None
        }
    }

    pub fn needs_display(&self) -> bool {
        self.message().is_some()
    }

    /// Camera usable for color capture.
    pub fn camera_ready(&self) -> bool {
        self.camera_authorized && self.camera_calibrated
    }
}

/// Edge detector for advisories raised once per occurrence.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarningLatch {
    active: bool,
}

impl WarningLatch {
    /// Feed the current condition. Returns `Some(true)` on the rising edge,
    /// `Some(false)` on the falling edge, `None` otherwise.
    pub fn update(&mut self, condition: bool) -> Option<bool> {
        if condition == self.active {
            return None;
        }
        self.active = condition;
        Some(condition)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn clear(&mut self) {
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_priority() {
        let mut status = AppStatus {
            sensor: SensorStatus::NeedsCharge,
            background: BackgroundProcessingStatus::Finalizing,
            tracking_lost: true,
            roaming_too_far: true,
            ..Default::default()
        };
        assert_eq!(status.message(), Some(StatusMessage::ChargeSensor));

        status.sensor = SensorStatus::NeedsConnect;
        assert_eq!(status.message(), Some(StatusMessage::ConnectSensor));

        status.camera_calibrated = false;
        assert_eq!(status.message(), Some(StatusMessage::NeedCalibratedCamera));
        status.camera_authorized = false;
        assert_eq!(status.message(), Some(StatusMessage::NeedCameraAccess));

        let scanning = AppStatus {
            tracking_lost: true,
            roaming_too_far: true,
            ..Default::default()
        };
        assert_eq!(scanning.message(), Some(StatusMessage::TrackingLost));
        assert!(!AppStatus::default().needs_display());
    }

    #[test]
    fn test_disabled_messages() {
        let status = AppStatus {
            sensor: SensorStatus::NeedsConnect,
            messages_enabled: false,
            ..Default::default()
        };
        assert_eq!(status.message(), None);
        assert!(!status.needs_display());
    }

    #[test]
    fn test_latch_fires_once_per_edge() {
        let mut latch = WarningLatch::default();
        assert_eq!(latch.update(false), None);
        assert_eq!(latch.update(true), Some(true));
        assert_eq!(latch.update(true), None);
        assert_eq!(latch.update(true), None);
        assert_eq!(latch.update(false), Some(false));
        assert_eq!(latch.update(true), Some(true));
    }
}
