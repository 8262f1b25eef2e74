//! Dedicated render thread driving a [`Renderer`] at a fixed cadence.
//!
//! The GPU context is built on the render thread itself from a `Send`
//! factory, so no GPU handle ever crosses a thread boundary. Other threads
//! talk to it through [`RenderThreadHandle`].

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel as xchan;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{BackendError, RenderError};
use crate::events::{RenderCommand, SurfaceReady};
use crate::frame_source::FrameSink;
use crate::gpu::backend::GpuBackend;
use crate::gpu::context::RenderContext;
use crate::inputs::RenderInputs;
use crate::slot::Latest;
use crate::tasks::renderer::{RenderStats, Renderer, ShaderSources};

/// Builds the GPU backend on the render thread.
pub type BackendFactory =
    Box<dyn FnOnce() -> Result<Box<dyn GpuBackend>, BackendError> + Send + 'static>;

#[derive(Debug, Clone)]
pub struct RenderThreadConfig {
    pub frame_interval: Duration,
    pub viewport: (u32, u32),
    pub sources: ShaderSources,
}

impl Default for RenderThreadConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(16),
            viewport: (1280, 720),
            sources: ShaderSources::default(),
        }
    }
}

/// Control surface for a running render thread; safe to share across threads.
#[derive(Debug)]
pub struct RenderThreadHandle {
    commands: xchan::Sender<RenderCommand>,
    join: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<Latest<RenderStats>>,
    stopped: Arc<AtomicBool>,
    sink: FrameSink,
    inputs: RenderInputs,
}

/// Starts the render thread and waits for the pipeline to initialize.
///
/// Initialization errors (backend creation, shader compile/link, surface
/// creation) are returned here and the thread has already exited.
pub fn spawn(
    config: RenderThreadConfig,
    inputs: RenderInputs,
    surface: SurfaceReady,
    factory: BackendFactory,
) -> Result<RenderThreadHandle, RenderError> {
    let (init_tx, init_rx) = xchan::bounded::<Result<FrameSink, RenderError>>(1);
    let (cmd_tx, cmd_rx) = xchan::unbounded::<RenderCommand>();
    let stats = Arc::new(Latest::new(RenderStats::default()));
    let stopped = Arc::new(AtomicBool::new(false));

    let thread_inputs = inputs.clone();
    let thread_stats = Arc::clone(&stats);
    let thread_stopped = Arc::clone(&stopped);
    let join = thread::Builder::new()
        .name("render".into())
        .spawn(move || {
            let backend = match factory() {
                Ok(backend) => backend,
                Err(err) => {
                    let _ = init_tx.send(Err(RenderError::SurfaceCreation(err.to_string())));
                    return;
                }
            };
            let ctx = RenderContext::new(backend);
            let mut renderer =
                Renderer::new(ctx, thread_inputs, config.sources, config.viewport);
            match renderer.initialize(surface) {
                Ok(sink) => {
                    if init_tx.send(Ok(sink)).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            }
            run(renderer, cmd_rx, config.frame_interval, &thread_stats, &thread_stopped);
        })
        .map_err(RenderError::ThreadSpawn)?;

    let sink = match init_rx.recv() {
        Ok(Ok(sink)) => sink,
        Ok(Err(err)) => {
            let _ = join.join();
            return Err(err);
        }
        Err(_) => {
            return Err(match join.join() {
                Err(payload) => RenderError::ThreadPanicked(panic_message(payload.as_ref())),
                Ok(()) => RenderError::ThreadGone,
            });
        }
    };
    info!(
        session = surface.session,
        interval = ?config.frame_interval,
        "render thread started"
    );
    Ok(RenderThreadHandle {
        commands: cmd_tx,
        join: Mutex::new(Some(join)),
        stats,
        stopped,
        sink,
        inputs,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

fn run(
    mut renderer: Renderer,
    commands: xchan::Receiver<RenderCommand>,
    interval: Duration,
    stats: &Latest<RenderStats>,
    stopped: &AtomicBool,
) {
    let ticker = xchan::tick(interval);
    // Set once the loop can no longer draw; reported through the shutdown ack.
    let mut fatal: Option<RenderError> = None;
    loop {
        xchan::select! {
            recv(commands) -> msg => match msg {
                Ok(RenderCommand::Resize { width, height }) => {
                    if fatal.is_none() {
                        if let Err(err) = renderer.resize(width, height) {
                            error!(error = %err, "resize failed, render loop stopped");
                            stopped.store(true, Ordering::Release);
                            fatal = Some(err);
                        }
                    }
                }
                Ok(RenderCommand::Shutdown { ack }) => {
                    let released = renderer.release();
                    stats.publish(renderer.stats());
                    let result = match (fatal.take(), released) {
                        (Some(err), released) => {
                            if let Err(release_err) = released {
                                warn!(error = %release_err, "release after fatal error failed");
                            }
                            Err(err)
                        }
                        (None, released) => released,
                    };
                    if ack.send(result).is_err() {
                        debug!("shutdown requester went away before ack");
                    }
                    return;
                }
                Err(_) => {
                    debug!("render handle dropped, releasing");
                    if let Err(err) = renderer.release() {
                        warn!(error = %err, "release without handle failed");
                    }
                    return;
                }
            },
            recv(ticker) -> _ => {
                if fatal.is_none() {
                    match renderer.render_frame() {
                        Ok(_) => {
                            stats.publish(renderer.stats());
                        }
                        Err(err) => {
                            error!(error = %err, "frame failed, render loop stopped");
                            stopped.store(true, Ordering::Release);
                            fatal = Some(err);
                        }
                    }
                }
            },
        }
    }
}

impl RenderThreadHandle {
    /// The producer handle the camera session delivers frames into.
    pub fn frame_sink(&self) -> FrameSink {
        self.sink.clone()
    }

    pub fn inputs(&self) -> &RenderInputs {
        &self.inputs
    }

    /// Counters as of the last frame the render thread finished.
    pub fn stats(&self) -> RenderStats {
        *self.stats.load().value
    }

    pub fn resize(&self, width: u32, height: u32) -> Result<(), RenderError> {
        self.commands
            .send(RenderCommand::Resize { width, height })
            .map_err(|_| RenderError::Released)
    }

    pub fn is_running(&self) -> bool {
        self.join.lock().is_some()
    }

    /// True once a frame or resize error stopped the loop; `shutdown` returns that error.
    pub fn has_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Releases every GPU handle and joins the render thread.
    ///
    /// Blocks until the render thread acknowledges. Any thread may call it;
    /// every call after the first returns [`RenderError::Released`]. An error
    /// that stopped the loop earlier is returned here.
    pub fn shutdown(&self) -> Result<RenderStats, RenderError> {
        let mut join = self.join.lock();
        let Some(handle) = join.take() else {
            return Err(RenderError::Released);
        };
        let (ack_tx, ack_rx) = xchan::bounded(1);
        let acked = match self.commands.send(RenderCommand::Shutdown { ack: ack_tx }) {
            Ok(()) => ack_rx.recv().map_err(|_| RenderError::ThreadGone),
            Err(_) => Err(RenderError::ThreadGone),
        };
        if let Err(payload) = handle.join() {
            let message = panic_message(payload.as_ref());
            error!(%message, "render thread panicked");
            return Err(RenderError::ThreadPanicked(message));
        }
        let result = acked?;
        info!("render thread stopped");
        result
    }
}

impl Drop for RenderThreadHandle {
    fn drop(&mut self) {
        if self.join.get_mut().is_some() {
            if let Err(err) = self.shutdown() {
                warn!(error = %err, "render thread shutdown on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::error::ShaderError;
    use crate::events::CameraFrame;
    use crate::gpu::headless::{FaultPoint, HeadlessBackend, HeadlessProbe};

    fn headless() -> (BackendFactory, HeadlessProbe) {
        let (backend, probe) = HeadlessBackend::new();
        let factory: BackendFactory = Box::new(move || Ok(Box::new(backend) as Box<dyn GpuBackend>));
        (factory, probe)
    }

    fn config() -> RenderThreadConfig {
        RenderThreadConfig {
            frame_interval: Duration::from_millis(2),
            viewport: (4, 4),
            ..RenderThreadConfig::default()
        }
    }

    fn wait_for(handle: &RenderThreadHandle, pred: impl Fn(&RenderStats) -> bool) -> RenderStats {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stats = handle.stats();
            if pred(&stats) || Instant::now() > deadline {
                return stats;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn renders_until_shutdown_from_another_thread() {
        let (factory, probe) = headless();
        let handle = spawn(config(), RenderInputs::default(), SurfaceReady::new(1), factory).unwrap();
        handle
            .frame_sink()
            .deliver(CameraFrame::new(4, 4, vec![200u8; 64], Duration::ZERO).unwrap())
            .unwrap();
        let stats = wait_for(&handle, |s| s.drawn >= 3 && s.fresh >= 1);
        assert!(stats.drawn >= 3);

        let handle = Arc::new(handle);
        let remote = Arc::clone(&handle);
        let stats = thread::spawn(move || remote.shutdown())
            .join()
            .unwrap()
            .unwrap();
        assert!(stats.drawn >= 3);
        assert_eq!(probe.live_programs(), 0);
        assert_eq!(probe.live_textures(), 0);
        assert!(!handle.is_running());

        assert!(matches!(handle.shutdown(), Err(RenderError::Released)));
        assert!(matches!(handle.resize(8, 8), Err(RenderError::Released)));
        assert!(matches!(
            handle.frame_sink().deliver(CameraFrame::new(1, 1, vec![0; 4], Duration::ZERO).unwrap()),
            Err(RenderError::Released)
        ));
    }

    #[test]
    fn resize_reaches_the_backend() {
        let (factory, probe) = headless();
        let handle = spawn(config(), RenderInputs::default(), SurfaceReady::new(1), factory).unwrap();
        handle.resize(16, 9).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while probe.viewport() != (16, 9) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(probe.viewport(), (16, 9));
        handle.shutdown().unwrap();
    }

    #[test]
    fn compile_error_is_returned_from_spawn() {
        let (factory, probe) = headless();
        let config = RenderThreadConfig {
            sources: ShaderSources {
                fragment: "@fragment fn broken(".into(),
                ..ShaderSources::default()
            },
            ..config()
        };
        let err = spawn(config, RenderInputs::default(), SurfaceReady::new(1), factory).unwrap_err();
        assert!(matches!(err, RenderError::Shader(ShaderError::Compile { .. })));
        assert_eq!(probe.live_programs(), 0);
    }

    #[test]
    fn backend_factory_failure_is_surface_creation() {
        let factory: BackendFactory = Box::new(|| Err(BackendError::Other("no adapter".into())));
        let err = spawn(config(), RenderInputs::default(), SurfaceReady::new(1), factory).unwrap_err();
        assert!(matches!(err, RenderError::SurfaceCreation(msg) if msg.contains("no adapter")));
    }

    #[test]
    fn device_rejection_is_a_shader_error() {
        let (factory, probe) = headless();
        probe.fail_next(
            FaultPoint::CreateProgram,
            BackendError::Other("`adjust` rejected by the device: bad layout".into()),
        );
        let err = spawn(config(), RenderInputs::default(), SurfaceReady::new(1), factory).unwrap_err();
        assert!(
            matches!(&err, RenderError::Shader(ShaderError::Backend(msg)) if msg.contains("bad layout")),
            "{err:?}"
        );
        assert_eq!(probe.live_textures(), 0);
    }

    #[test]
    fn panic_on_render_thread_keeps_its_message() {
        let factory: BackendFactory = Box::new(|| panic!("adapter exploded"));
        let err = spawn(config(), RenderInputs::default(), SurfaceReady::new(1), factory).unwrap_err();
        assert!(
            matches!(&err, RenderError::ThreadPanicked(msg) if msg.contains("adapter exploded")),
            "{err:?}"
        );
    }

    #[test]
    fn fatal_frame_error_is_reported_on_shutdown() {
        let (factory, probe) = headless();
        probe.fail_next(FaultPoint::Draw, BackendError::OutOfMemory);
        let handle = spawn(config(), RenderInputs::default(), SurfaceReady::new(1), factory).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.has_stopped() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(handle.has_stopped());
        assert!(matches!(
            handle.shutdown(),
            Err(RenderError::Backend(BackendError::OutOfMemory))
        ));
        assert_eq!(probe.live_textures(), 0);
    }
}
