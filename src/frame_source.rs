//! Camera frames into a GPU texture, newest frame wins.
//!
//! The camera collaborator pushes through a [`FrameSink`] from any thread;
//! the render thread latches whatever is newest at the top of each frame.
//! Frames that arrive between two latches are dropped, never queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::error::{BackendError, RenderError};
use crate::events::CameraFrame;
use crate::gpu::backend::{TextureHandle, TextureKind};
use crate::gpu::context::RenderContext;

/// Outcome of [`FrameSourceAdapter::acquire_latest_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameToken {
    /// A new frame was latched this call.
    Fresh { sequence: u64 },
    /// No new frame; the texture still holds the previous one.
    Reused { sequence: u64 },
    /// Nothing has ever been delivered.
    Empty,
}

impl FrameToken {
    pub fn sequence(self) -> Option<u64> {
        match self {
            Self::Fresh { sequence } | Self::Reused { sequence } => Some(sequence),
            Self::Empty => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub delivered: u64,
    pub latched: u64,
    /// Frames overwritten before they were ever latched.
    pub coalesced: u64,
}

#[derive(Debug, Default)]
struct Pending {
    sequence: u64,
    frame: Option<CameraFrame>,
}

#[derive(Debug, Default)]
struct Shared {
    pending: Mutex<Pending>,
    released: AtomicBool,
    delivered: AtomicU64,
    coalesced: AtomicU64,
}

/// Producer handle; clone freely and deliver from any thread.
#[derive(Debug, Clone)]
pub struct FrameSink {
    shared: Arc<Shared>,
}

impl FrameSink {
    /// Publishes `frame` as the newest, returning its sequence number.
    pub fn deliver(&self, frame: CameraFrame) -> Result<u64, RenderError> {
        if self.shared.released.load(Ordering::Acquire) {
            return Err(RenderError::Released);
        }
        let mut pending = self.shared.pending.lock();
        pending.sequence += 1;
        if pending.frame.replace(frame).is_some() {
            self.shared.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.delivered.fetch_add(1, Ordering::Relaxed);
        trace!(sequence = pending.sequence, "camera frame delivered");
        Ok(pending.sequence)
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }
}

/// Render-thread side: owns the external texture the camera feeds.
#[derive(Debug)]
pub struct FrameSourceAdapter {
    shared: Arc<Shared>,
    texture: Option<TextureHandle>,
    last: Option<(u64, CameraFrame)>,
    latched: u64,
}

fn surface_error(err: BackendError) -> RenderError {
    RenderError::SurfaceCreation(err.to_string())
}

impl FrameSourceAdapter {
    /// Creates the external texture; failure maps to [`RenderError::SurfaceCreation`].
    pub fn new(ctx: &mut RenderContext) -> Result<Self, RenderError> {
        let texture = ctx
            .backend()?
            .create_texture(TextureKind::External)
            .map_err(surface_error)?;
        debug!(%texture, "camera texture created");
        Ok(Self {
            shared: Arc::new(Shared::default()),
            texture: Some(texture),
            last: None,
            latched: 0,
        })
    }

    pub fn sink(&self) -> FrameSink {
        FrameSink {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn texture(&self) -> Result<TextureHandle, RenderError> {
        self.texture.ok_or(RenderError::Released)
    }

    /// Latches the newest delivered frame, if any arrived since the last call.
    pub fn acquire_latest_frame(&mut self, ctx: &mut RenderContext) -> Result<FrameToken, RenderError> {
        let texture = self.texture()?;
        let next = {
            let mut pending = self.shared.pending.lock();
            let sequence = pending.sequence;
            pending.frame.take().map(|frame| (sequence, frame))
        };
        let Some((sequence, frame)) = next else {
            return Ok(match &self.last {
                Some((sequence, _)) => FrameToken::Reused {
                    sequence: *sequence,
                },
                None => FrameToken::Empty,
            });
        };
        // Kept even if the latch fails so a rebuilt texture can be refilled.
        self.last = Some((sequence, frame));
        if let Some((_, frame)) = &self.last {
            ctx.backend()?.latch_frame(texture, frame)?;
        }
        self.latched += 1;
        trace!(sequence, "camera frame latched");
        Ok(FrameToken::Fresh { sequence })
    }

    /// Rebuilds the texture binding after a context or surface loss.
    ///
    /// Existing sinks stay valid and the last latched frame is uploaded again.
    pub fn recreate(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        if self.shared.released.load(Ordering::Acquire) {
            return Err(RenderError::Released);
        }
        let backend = ctx.backend()?;
        if let Some(old) = self.texture.take() {
            match backend.delete_texture(old) {
                Ok(()) | Err(BackendError::UnknownHandle(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        let texture = backend
            .create_texture(TextureKind::External)
            .map_err(surface_error)?;
        self.texture = Some(texture);
        if let Some((_, frame)) = &self.last {
            backend.latch_frame(texture, frame)?;
        }
        info!(%texture, "camera texture re-created");
        Ok(())
    }

    /// Terminal: deletes the texture and rejects all later deliveries.
    pub fn release(&mut self, ctx: &mut RenderContext) -> Result<(), RenderError> {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            return Err(RenderError::Released);
        }
        self.shared.pending.lock().frame = None;
        self.last = None;
        if let Some(texture) = self.texture.take() {
            match ctx.backend()?.delete_texture(texture) {
                Ok(()) | Err(BackendError::UnknownHandle(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        debug!("camera texture released");
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            latched: self.latched,
            coalesced: self.shared.coalesced.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gpu::headless::{FaultPoint, HeadlessBackend, HeadlessProbe};

    fn context() -> (RenderContext, HeadlessProbe) {
        let (backend, probe) = HeadlessBackend::new();
        (RenderContext::new(Box::new(backend)), probe)
    }

    fn frame(value: u8) -> CameraFrame {
        CameraFrame::new(2, 1, vec![value; 8], Duration::from_millis(u64::from(value))).unwrap()
    }

    #[test]
    fn empty_before_first_delivery() {
        let (mut ctx, _) = context();
        let mut adapter = FrameSourceAdapter::new(&mut ctx).unwrap();
        assert_eq!(adapter.acquire_latest_frame(&mut ctx).unwrap(), FrameToken::Empty);
    }

    #[test]
    fn burst_coalesces_to_newest_frame() {
        let (mut ctx, probe) = context();
        let mut adapter = FrameSourceAdapter::new(&mut ctx).unwrap();
        let sink = adapter.sink();
        for value in 1..=3 {
            sink.deliver(frame(value)).unwrap();
        }
        assert_eq!(
            adapter.acquire_latest_frame(&mut ctx).unwrap(),
            FrameToken::Fresh { sequence: 3 }
        );
        assert_eq!(probe.count("latch-frame"), 1);
        assert_eq!(
            adapter.stats(),
            FrameStats {
                delivered: 3,
                latched: 1,
                coalesced: 2,
            }
        );
    }

    #[test]
    fn no_new_frame_reuses_previous() {
        let (mut ctx, probe) = context();
        let mut adapter = FrameSourceAdapter::new(&mut ctx).unwrap();
        adapter.sink().deliver(frame(9)).unwrap();
        adapter.acquire_latest_frame(&mut ctx).unwrap();
        assert_eq!(
            adapter.acquire_latest_frame(&mut ctx).unwrap(),
            FrameToken::Reused { sequence: 1 }
        );
        assert_eq!(probe.count("latch-frame"), 1);
    }

    #[test]
    fn release_is_terminal_for_adapter_and_sink() {
        let (mut ctx, probe) = context();
        let mut adapter = FrameSourceAdapter::new(&mut ctx).unwrap();
        let sink = adapter.sink();
        adapter.release(&mut ctx).unwrap();
        assert_eq!(probe.live_textures(), 0);
        assert!(matches!(sink.deliver(frame(1)), Err(RenderError::Released)));
        assert!(matches!(
            adapter.acquire_latest_frame(&mut ctx),
            Err(RenderError::Released)
        ));
        assert!(matches!(adapter.release(&mut ctx), Err(RenderError::Released)));
        assert!(matches!(adapter.recreate(&mut ctx), Err(RenderError::Released)));
    }

    #[test]
    fn recreate_relatches_last_frame_for_existing_sink() {
        let (mut ctx, probe) = context();
        let mut adapter = FrameSourceAdapter::new(&mut ctx).unwrap();
        let sink = adapter.sink();
        sink.deliver(frame(4)).unwrap();
        adapter.acquire_latest_frame(&mut ctx).unwrap();
        let before = adapter.texture().unwrap();

        adapter.recreate(&mut ctx).unwrap();
        assert_ne!(adapter.texture().unwrap(), before);
        assert_eq!(probe.count("latch-frame"), 2);
        assert_eq!(probe.live_textures(), 1);
        assert_eq!(sink.deliver(frame(5)).unwrap(), 2);
    }

    #[test]
    fn texture_creation_failure_is_surface_error() {
        let (mut ctx, probe) = context();
        probe.fail_next(FaultPoint::CreateTexture, BackendError::OutOfMemory);
        assert!(matches!(
            FrameSourceAdapter::new(&mut ctx),
            Err(RenderError::SurfaceCreation(_))
        ));
    }
}
