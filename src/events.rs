use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::error::RenderError;
use crate::tasks::renderer::RenderStats;

/// One camera image in RGBA8, row-major, no row padding.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
    timestamp: Duration,
}

impl CameraFrame {
    pub fn new(
        width: u32,
        height: u32,
        pixels: impl Into<Arc<[u8]>>,
        timestamp: Duration,
    ) -> Result<Self, RenderError> {
        let pixels = pixels.into();
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(RenderError::InvalidFrame {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
            timestamp,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Capture time relative to the producer's clock origin.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

/// Proof that the platform has a drawable surface; required to initialize the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceReady {
    pub session: u64,
}

impl SurfaceReady {
    pub fn new(session: u64) -> Self {
        Self { session }
    }
}

#[derive(Debug)]
pub enum RenderCommand {
    Resize {
        width: u32,
        height: u32,
    },
    Shutdown {
        ack: Sender<Result<RenderStats, RenderError>>,
    },
}
