/// Counters for the debug overlay, reset with each scan.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CaptureStatistics {
    pub frames_received: usize,
    pub frames_accepted: usize,
    pub frames_rejected: usize,
    /// Frames tracked with `Good` quality while scanning.
    pub frames_tracked: usize,
    /// Scanning frames with any other quality.
    pub tracking_failures: usize,
    pub keyframes_captured: usize,
    pub keyframes_evicted: usize,
    pub scan_started_at: Option<f64>,
    pub last_frame_at: Option<f64>,
}

impl CaptureStatistics {
    /// Fraction of scanning frames that tracked well.
    pub fn tracked_ratio(&self) -> f64 {
        let total = self.frames_tracked + self.tracking_failures;
        if total == 0 {
            return 0.0;
        }
        self.frames_tracked as f64 / total as f64
    }

    /// Seconds of sensor time since scanning started.
    pub fn scan_duration_s(&self) -> f64 {
        match (self.scan_started_at, self.last_frame_at) {
            (Some(start), Some(last)) if last >= start => last - start,
            _ => 0.0,
        }
    }
}
