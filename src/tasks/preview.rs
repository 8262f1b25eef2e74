//! Windowed live preview: a winit window whose surface the render thread draws into.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

use crate::events::SurfaceReady;
use crate::frame_source::FrameSink;
use crate::gpu::backend::GpuBackend;
use crate::gpu::wgpu_backend::WgpuBackend;
use crate::inputs::RenderInputs;
use crate::tasks::render_thread::{self, BackendFactory, RenderThreadConfig, RenderThreadHandle};
use crate::tasks::renderer::RenderStats;

#[derive(Debug)]
enum PreviewEvent {
    Cancelled,
}

struct PreviewApp {
    cancel: CancellationToken,
    inputs: RenderInputs,
    thread_config: RenderThreadConfig,
    clear_color: [u8; 3],
    window: Option<Arc<Window>>,
    render: Option<RenderThreadHandle>,
    sink_tx: Option<oneshot::Sender<FrameSink>>,
    failure: Option<anyhow::Error>,
}

impl PreviewApp {
    fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Option<Arc<Window>> {
        if let Some(window) = self.window.as_ref() {
            return Some(window.clone());
        }
        let (width, height) = self.thread_config.viewport;
        let attrs = WindowAttributes::default()
            .with_title("Camera Render")
            .with_inner_size(PhysicalSize::new(width, height));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let window = Arc::new(window);
                self.window = Some(window.clone());
                Some(window)
            }
            Err(err) => {
                error!(error = %err, "failed to create preview window");
                None
            }
        }
    }

    fn start_render_thread(&mut self, window: Arc<Window>) -> Result<()> {
        let size = window.inner_size();
        let mut config = self.thread_config.clone();
        config.viewport = (size.width.max(1), size.height.max(1));
        let clear_color = self.clear_color;
        let factory: BackendFactory = Box::new(move || {
            WgpuBackend::new(window, clear_color).map(|b| Box::new(b) as Box<dyn GpuBackend>)
        });
        let handle = render_thread::spawn(config, self.inputs.clone(), SurfaceReady::new(1), factory)
            .context("failed to start render thread")?;
        if let Some(tx) = self.sink_tx.take() {
            if tx.send(handle.frame_sink()).is_err() {
                debug!("camera producer gone before the surface was ready");
            }
        }
        self.render = Some(handle);
        Ok(())
    }

    fn resize(&self, size: PhysicalSize<u32>) {
        let Some(render) = self.render.as_ref() else {
            return;
        };
        if let Err(err) = render.resize(size.width, size.height) {
            warn!(error = %err, "failed to forward resize");
        }
    }
}

impl ApplicationHandler<PreviewEvent> for PreviewApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.cancel.is_cancelled() {
            event_loop.exit();
            return;
        }
        if self.render.is_some() {
            return;
        }
        let Some(window) = self.ensure_window(event_loop) else {
            self.failure = Some(anyhow!("failed to create preview window"));
            event_loop.exit();
            return;
        };
        if let Err(err) = self.start_render_thread(window) {
            error!(error = ?err, "failed to initialize render pipeline");
            self.failure = Some(err);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window.id() != window_id {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                info!("preview window close requested");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => self.resize(size),
            WindowEvent::ScaleFactorChanged {
                mut inner_size_writer,
                ..
            } => {
                let size = window.inner_size();
                let _ = inner_size_writer.request_inner_size(size);
                self.resize(size);
            }
            _ => {}
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: PreviewEvent) {
        match event {
            PreviewEvent::Cancelled => {
                info!("preview received cancellation event");
                event_loop.exit();
            }
        }
    }
}

/// Runs the preview window on the calling thread until it closes or `cancel` fires.
///
/// The camera's [`FrameSink`] is sent through `sink_tx` once the pipeline is up.
pub fn run_windowed(
    thread_config: RenderThreadConfig,
    clear_color: [u8; 3],
    inputs: RenderInputs,
    sink_tx: oneshot::Sender<FrameSink>,
    cancel: CancellationToken,
) -> Result<RenderStats> {
    let event_loop = EventLoop::<PreviewEvent>::with_user_event()
        .build()
        .context("failed to build preview event loop")?;
    let proxy = event_loop.create_proxy();

    let cancel_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = proxy.send_event(PreviewEvent::Cancelled);
        })
    };

    let mut app = PreviewApp {
        cancel,
        inputs,
        thread_config,
        clear_color,
        window: None,
        render: None,
        sink_tx: Some(sink_tx),
        failure: None,
    };
    let run_result = event_loop.run_app(&mut app);
    cancel_task.abort();

    let stats = match app.render.take() {
        Some(render) => render.shutdown().context("render thread failed")?,
        None => RenderStats::default(),
    };
    run_result.context("preview event loop failed")?;
    if let Some(err) = app.failure.take() {
        return Err(err);
    }
    Ok(stats)
}
