//! Streams synthetic face-tracking records to the avatar driver.
//!
//! Usage: fake_tracker [addr] [--legacy]

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::SinkExt;
use tokio::net::TcpStream;
use tracing::info;
use tracing_subscriber::EnvFilter;

use avatar_driver::protocol::{self, Framing};
use avatar_driver::PoseSnapshot;

const DEFAULT_ADDR: &str = "127.0.0.1:5066";
const SEND_INTERVAL: Duration = Duration::from_millis(33);

/// Slow head sway, a blink every 4 s, and a talking mouth.
fn synthetic_pose(t: f32) -> PoseSnapshot {
    let ear = if t % 4.0 < 0.15 { 0.28 } else { 0.36 };
    let gaze_x = 0.5 + 0.2 * (0.7 * t).sin();
    let gaze_y = 0.5 + 0.1 * (0.9 * t).sin();

    PoseSnapshot {
        roll: 8.0 * (0.3 * t).sin(),
        pitch: 10.0 * (0.5 * t).sin(),
        yaw: 25.0 * (0.8 * t).sin(),
        ear_left: ear,
        ear_right: ear,
        gaze_x_left: gaze_x,
        gaze_y_left: gaze_y,
        gaze_x_right: gaze_x,
        gaze_y_right: gaze_y,
        mouth_aspect_ratio: ((2.0 * t).sin() + 1.0) * 0.3,
        mouth_distance: 70.0 + 8.0 * (0.4 * t).sin(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let framing = if args.iter().any(|a| a == "--legacy") {
        Framing::Whitespace
    } else {
        Framing::Line
    };
    let addr = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .map(String::as_str)
        .unwrap_or(DEFAULT_ADDR);

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;
    stream.set_nodelay(true)?;
    info!("Connected to {} ({:?} framing)", addr, framing);

    let mut sink = protocol::record_sink(stream, framing);
    let mut interval = tokio::time::interval(SEND_INTERVAL);
    let start = Instant::now();
    let mut sent = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = interval.tick() => {
                let pose = synthetic_pose(start.elapsed().as_secs_f32());
                sink.send(pose).await.context("connection lost")?;
                sent += 1;
            }
        }
    }

    info!("Sent {} records", sent);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_pose_blinks() {
        assert_eq!(synthetic_pose(0.1).ear_left, 0.28);
        assert_eq!(synthetic_pose(1.0).ear_left, 0.36);
        assert_eq!(synthetic_pose(4.05).ear_right, 0.28);
    }

    #[test]
    fn test_synthetic_pose_is_bounded() {
        for i in 0..1000 {
            let pose = synthetic_pose(i as f32 * 0.033);
            assert!(pose.yaw.abs() <= 25.0);
            assert!((0.0..=0.6).contains(&pose.mouth_aspect_ratio));
            assert!(pose.to_fields().iter().all(|v| v.is_finite()));
        }
    }
}
