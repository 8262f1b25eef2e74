//! Stand-in camera and gyroscope producers for running without hardware.

use std::f32::consts::TAU;
use std::time::Instant;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::select;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SyntheticConfig;
use crate::error::RenderError;
use crate::events::CameraFrame;
use crate::frame_source::FrameSink;
use crate::parallax::SensorSink;

/// Seconds per full sweep of the animated test pattern.
const PATTERN_PERIOD: f32 = 4.0;
/// Seconds per full period of the simulated sway.
const SWAY_PERIOD: f32 = 2.0;

/// RGBA test pattern: red across, green down, blue cycling with `phase` in [0, 1).
pub fn gradient_frame(
    width: u32,
    height: u32,
    phase: f32,
    timestamp: std::time::Duration,
) -> Result<CameraFrame, RenderError> {
    let blue = ((phase.fract() * TAU).sin() * 0.5 + 0.5) * 255.0;
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        let g = (y as f32 / height.max(2).saturating_sub(1) as f32 * 255.0).round() as u8;
        for x in 0..width {
            let r = (x as f32 / width.max(2).saturating_sub(1) as f32 * 255.0).round() as u8;
            pixels.extend_from_slice(&[r, g, blue.round() as u8, u8::MAX]);
        }
    }
    CameraFrame::new(width, height, pixels, timestamp)
}

/// Delivers animated frames at `camera-fps` until cancelled or the sink is released.
pub async fn run_camera(
    sink: FrameSink,
    config: SyntheticConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = time::interval(config.camera_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let start = Instant::now();
    info!(
        fps = config.camera_fps,
        width = config.frame_width,
        height = config.frame_height,
        "synthetic camera started"
    );
    loop {
        select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let elapsed = start.elapsed();
                let phase = elapsed.as_secs_f32() / PATTERN_PERIOD;
                let frame = gradient_frame(config.frame_width, config.frame_height, phase, elapsed)?;
                match sink.deliver(frame) {
                    Ok(_) => {}
                    Err(RenderError::Released) => {
                        debug!("frame sink released, camera stopping");
                        break;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }
    Ok(())
}

/// Feeds a noisy sinusoidal angular velocity into `sensor` at `gyro-hz`.
pub async fn run_gyro(
    sensor: SensorSink,
    config: SyntheticConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = time::interval(config.gyro_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut rng = StdRng::from_os_rng();
    let start = Instant::now();
    let amplitude = config.gyro_amplitude;
    info!(hz = config.gyro_hz, amplitude, "synthetic gyroscope started");
    loop {
        select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let angle = start.elapsed().as_secs_f32() / SWAY_PERIOD * TAU;
                let noise = amplitude * 0.05;
                let vx = amplitude * angle.sin() + rng.random_range(-noise..=noise);
                let vy = amplitude * 0.5 * angle.cos() + rng.random_range(-noise..=noise);
                sensor.on_sample(vx, vy);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::frame_source::{FrameSourceAdapter, FrameToken};
    use crate::gpu::context::RenderContext;
    use crate::gpu::headless::HeadlessBackend;
    use crate::inputs::RenderInputs;
    use crate::parallax::{ParallaxConfig, ParallaxOffset};

    fn fast() -> SyntheticConfig {
        SyntheticConfig {
            camera_fps: 200,
            frame_width: 8,
            frame_height: 4,
            gyro_hz: 500,
            gyro_amplitude: 2.0,
        }
    }

    #[test]
    fn gradient_spans_full_range() {
        let frame = gradient_frame(8, 4, 0.0, Duration::ZERO).unwrap();
        let px = |x: usize, y: usize| {
            let i = (y * 8 + x) * 4;
            &frame.pixels()[i..i + 4]
        };
        assert_eq!(px(0, 0)[..2], [0, 0]);
        assert_eq!(px(7, 3)[..2], [255, 255]);
        assert_eq!(px(3, 1)[3], 255);
        assert!(gradient_frame(0, 4, 0.0, Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn camera_delivers_until_cancelled() {
        let (backend, _probe) = HeadlessBackend::new();
        let mut ctx = RenderContext::new(Box::new(backend));
        let mut adapter = FrameSourceAdapter::new(&mut ctx).unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_camera(adapter.sink(), fast(), cancel.clone()));
        time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert!(matches!(
            adapter.acquire_latest_frame(&mut ctx).unwrap(),
            FrameToken::Fresh { .. }
        ));
        assert!(adapter.stats().delivered >= 1);
    }

    #[tokio::test]
    async fn camera_stops_when_sink_released() {
        let (backend, _probe) = HeadlessBackend::new();
        let mut ctx = RenderContext::new(Box::new(backend));
        let mut adapter = FrameSourceAdapter::new(&mut ctx).unwrap();
        let sink = adapter.sink();
        adapter.release(&mut ctx).unwrap();
        let cancel = CancellationToken::new();
        time::timeout(Duration::from_secs(5), run_camera(sink, fast(), cancel))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn gyro_publishes_bounded_offsets() {
        let inputs = RenderInputs::default();
        let config = ParallaxConfig::default();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_gyro(
            inputs.sensor_sink(config).unwrap(),
            fast(),
            cancel.clone(),
        ));
        time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        let offset = inputs.parallax();
        assert_ne!(offset, ParallaxOffset::ZERO);
        assert!(offset.dx.abs() <= config.max_offset);
        assert!(offset.dy.abs() <= config.max_offset);
    }
}
