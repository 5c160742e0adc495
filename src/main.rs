use std::time::Duration;

use anyhow::{Context, Result, bail};
use nalgebra::{UnitQuaternion, Vector3};
use tracing_subscriber::EnvFilter;

use room_capture::config::CaptureSessionConfig;
use room_capture::geometry::SE3;
use room_capture::io::SyntheticRoom;
use room_capture::sensor::CameraIntrinsics;
use room_capture::system::{CaptureEvent, CaptureStateMachine, RoomCaptureState, UserIntent};

const FRAME_RATE_HZ: f64 = 30.0;
/// Yaw per frame while turning, and the number of still frames after each turn.
const TURN_STEP_DEG: f64 = 2.0;
const TURN_FRAMES: usize = 15;
const SETTLE_FRAMES: usize = 6;
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(300);

/// Camera at the room center, turned `yaw_deg` about the vertical and pitched
/// slightly down so the floor and furniture stay in view.
fn turn_pose(yaw_deg: f64) -> SE3 {
    let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw_deg.to_radians());
    let pitch = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), -15f64.to_radians());
    SE3::new(yaw * pitch, Vector3::zeros())
}

fn drain_events(capture: &CaptureStateMachine) {
    for event in capture.events().try_iter() {
        match event {
            CaptureEvent::StatusChanged(Some(message)) => println!("  status: {}", message.text()),
            CaptureEvent::StatusChanged(None) => println!("  status: (clear)"),
            CaptureEvent::StateChanged { from, to } => println!("  state: {} -> {}", from, to),
            CaptureEvent::KeyframeCaptured { id, evicted } => match evicted {
                Some(old) => println!("  keyframe {} (evicted {})", id, old),
                None => println!("  keyframe {}", id),
            },
            other => println!("  {:?}", other),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("room_capture=info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            println!("Loading capture config from: {}", path);
            CaptureSessionConfig::load(&path).with_context(|| format!("loading {}", path))?
        }
        None => CaptureSessionConfig::default(),
    };

    let capture = CaptureStateMachine::new(config)?;
    let room = SyntheticRoom::furnished(CameraIntrinsics::from_fov(160, 120, 60.0));

    // Y points down in the sensor frame; the device is held level.
    capture.submit_gravity(Vector3::new(0.0, 9.81, 0.0));
    capture.handle_intent(UserIntent::SetVolumeSize(Vector3::new(6.0, 4.0, 6.0)))?;
    capture.handle_intent(UserIntent::SetResolution(0.05))?;
    capture.handle_intent(UserIntent::RequestHoleFilling)?;
    capture.handle_intent(UserIntent::RequestColorization)?;
    println!("Volume: {:?}", capture.volume());

    let mut frame_index = 0usize;
    let mut timestamp = move || {
        frame_index += 1;
        frame_index as f64 / FRAME_RATE_HZ
    };

    println!("Placing the volume...");
    for _ in 0..SETTLE_FRAMES {
        capture.process_frame(room.frame_pair(&turn_pose(0.0), timestamp()))?;
    }
    drain_events(&capture);

    capture.handle_intent(UserIntent::StartScan)?;
    println!("Scanning: one full turn in place");
    let turn_deg = TURN_STEP_DEG * TURN_FRAMES as f64;
    let turns = (360.0 / turn_deg).round() as usize;
    for turn in 0..turns {
        let base = turn as f64 * turn_deg;
        for i in 1..=TURN_FRAMES {
            capture.process_frame(room.frame_pair(&turn_pose(base + i as f64 * TURN_STEP_DEG), timestamp()))?;
        }
        let rest = turn_pose(base + turn_deg);
        for _ in 0..SETTLE_FRAMES {
            capture.process_frame(room.frame_pair(&rest, timestamp()))?;
        }
        drain_events(&capture);
        if capture.state() != RoomCaptureState::Scanning {
            bail!("scan aborted after turn {} (state {})", turn, capture.state());
        }
    }

    println!("Finalizing...");
    capture.handle_intent(UserIntent::Done)?;
    if !capture.wait_for_state(RoomCaptureState::Viewing, FINALIZE_TIMEOUT) {
        bail!("finalization did not reach viewing (state {})", capture.state());
    }
    if !capture.wait_for_idle(FINALIZE_TIMEOUT) {
        println!("Background processing still running after {:?}", FINALIZE_TIMEOUT);
    }
    drain_events(&capture);

    let artifact = capture.artifact().context("no mesh after finalization")?;
    let mesh = artifact.current();
    println!(
        "Mesh: {} vertices, {} triangles (hole filled: {}, colorized: {:?})",
        mesh.num_vertices(),
        mesh.num_triangles(),
        artifact.is_hole_filled(),
        artifact.color_quality,
    );
    for warning in &artifact.warnings {
        println!("  warning: {}", warning);
    }

    let stats = capture.statistics();
    println!(
        "Frames: {} received, {} accepted, {} rejected; tracked {:.1}% over {:.1} s",
        stats.frames_received,
        stats.frames_accepted,
        stats.frames_rejected,
        stats.tracked_ratio() * 100.0,
        stats.scan_duration_s(),
    );
    println!(
        "Keyframes: {} captured, {} evicted, {} kept",
        stats.keyframes_captured,
        stats.keyframes_evicted,
        capture.keyframes().len(),
    );
    if let Some(pose) = capture.pose_history().last() {
        println!("Final pose: {:?}", pose);
    }

    Ok(())
}
