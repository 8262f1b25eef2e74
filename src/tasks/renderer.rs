//! The render loop: lifecycle state machine plus the per-frame upload/draw pass.
//!
//! A [`Renderer`] owns the [`RenderContext`] and therefore must live on the
//! thread that created it. [`render_thread`](super::render_thread) drives one
//! from a dedicated thread; tests drive it directly.

use tracing::{debug, info, trace, warn};

use crate::error::{BackendError, RenderError};
use crate::events::SurfaceReady;
use crate::frame_source::{FrameSink, FrameSourceAdapter, FrameStats, FrameToken};
use crate::gpu::backend::{ProgramHandle, TextureHandle, TextureKind};
use crate::gpu::context::RenderContext;
use crate::gpu::shader;
use crate::gpu::shaders::{ADJUST_FRAGMENT, ADJUST_VERTEX, pipeline_requirements};
use crate::inputs::RenderInputs;

const PROGRAM_LABEL: &str = "adjust";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Uninitialized,
    Ready,
    Rendering,
    SurfaceChanged,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStateChange {
    pub from: RenderState,
    pub to: RenderState,
}

/// Lifecycle transitions; `Released` is absorbing.
#[derive(Debug)]
struct RenderSM {
    state: RenderState,
}

impl RenderSM {
    fn new() -> Self {
        Self {
            state: RenderState::Uninitialized,
        }
    }

    fn current(&self) -> RenderState {
        self.state
    }

    fn on_initialized(&mut self) -> Option<RenderStateChange> {
        match self.state {
            RenderState::Uninitialized => self.goto(RenderState::Ready),
            _ => None,
        }
    }

    fn on_viewport_changed(&mut self) -> Option<RenderStateChange> {
        match self.state {
            RenderState::Ready | RenderState::Rendering => self.goto(RenderState::SurfaceChanged),
            _ => None,
        }
    }

    fn on_drawn(&mut self) -> Option<RenderStateChange> {
        match self.state {
            RenderState::Ready | RenderState::SurfaceChanged => self.goto(RenderState::Rendering),
            _ => None,
        }
    }

    fn on_release(&mut self) -> Option<RenderStateChange> {
        self.goto(RenderState::Released)
    }

    fn goto(&mut self, to: RenderState) -> Option<RenderStateChange> {
        if self.state == to || self.state == RenderState::Released {
            return None;
        }
        let ch = RenderStateChange {
            from: self.state,
            to,
        };
        self.state = to;
        info!(from = ?ch.from, to = ?ch.to, "render state changed");
        Some(ch)
    }
}

/// Shader text the pipeline is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    pub vertex: String,
    pub fragment: String,
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self {
            vertex: ADJUST_VERTEX.to_owned(),
            fragment: ADJUST_FRAGMENT.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub drawn: u64,
    /// Frames drawn from a newly latched camera frame.
    pub fresh: u64,
    /// Frames that redrew the previous camera frame.
    pub reused: u64,
    pub lut_uploads: u64,
    pub recoveries: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Drawn,
    /// The surface was busy; nothing was presented.
    Skipped,
    /// The GPU binding was lost and rebuilt; nothing was presented.
    Recovered,
}

/// What one call to [`Renderer::render_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: FrameToken,
    pub lut_uploaded: bool,
    pub params_generation: u64,
    pub outcome: FrameOutcome,
}

pub struct Renderer {
    ctx: RenderContext,
    inputs: RenderInputs,
    sources: ShaderSources,
    sm: RenderSM,
    viewport: (u32, u32),
    program: Option<ProgramHandle>,
    adapter: Option<FrameSourceAdapter>,
    lut_texture: Option<TextureHandle>,
    uploaded_lut: Option<u64>,
    stats: RenderStats,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.ctx.backend_name())
            .field("state", &self.sm.current())
            .field("viewport", &self.viewport)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn ignore_unknown(result: Result<(), BackendError>) -> Result<(), RenderError> {
    match result {
        Ok(()) | Err(BackendError::UnknownHandle(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

impl Renderer {
    pub fn new(
        ctx: RenderContext,
        inputs: RenderInputs,
        sources: ShaderSources,
        viewport: (u32, u32),
    ) -> Self {
        Self {
            ctx,
            inputs,
            sources,
            sm: RenderSM::new(),
            viewport: (viewport.0.max(1), viewport.1.max(1)),
            program: None,
            adapter: None,
            lut_texture: None,
            uploaded_lut: None,
            stats: RenderStats::default(),
        }
    }

    pub fn state(&self) -> RenderState {
        self.sm.current()
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn inputs(&self) -> &RenderInputs {
        &self.inputs
    }

    pub fn frame_stats(&self) -> Option<FrameStats> {
        self.adapter.as_ref().map(FrameSourceAdapter::stats)
    }

    /// Builds the program, the camera texture, and the LUT texture, then enters `Ready`.
    ///
    /// On failure every partially created handle is deleted and the renderer
    /// stays `Uninitialized`, so the owner may try again.
    pub fn initialize(&mut self, surface: SurfaceReady) -> Result<FrameSink, RenderError> {
        match self.sm.current() {
            RenderState::Uninitialized => {}
            RenderState::Released => return Err(RenderError::Released),
            state => return Err(RenderError::AlreadyInitialized { state }),
        }
        info!(
            session = surface.session,
            backend = self.ctx.backend_name(),
            "initializing render pipeline"
        );
        if let Err(err) = self.build_pipeline() {
            if let Err(cleanup) = self.delete_handles() {
                warn!(error = %cleanup, "cleanup after failed initialization");
            }
            return Err(err);
        }
        let sink = match &self.adapter {
            Some(adapter) => adapter.sink(),
            None => return Err(RenderError::SurfaceCreation("camera texture missing".into())),
        };
        self.sm.on_initialized();
        info!(
            width = self.viewport.0,
            height = self.viewport.1,
            "render pipeline ready"
        );
        Ok(sink)
    }

    fn build_pipeline(&mut self) -> Result<(), RenderError> {
        self.program = Some(self.compile_program()?);
        self.adapter = Some(FrameSourceAdapter::new(&mut self.ctx)?);
        self.lut_texture = Some(self.create_lut_texture()?);
        self.uploaded_lut = None;
        let (width, height) = self.viewport;
        self.ctx.backend()?.set_viewport(width, height)?;
        Ok(())
    }

    fn compile_program(&mut self) -> Result<ProgramHandle, RenderError> {
        shader::compile(
            &mut self.ctx,
            PROGRAM_LABEL,
            &self.sources.vertex,
            &self.sources.fragment,
            &pipeline_requirements(),
        )
    }

    fn create_lut_texture(&mut self) -> Result<TextureHandle, RenderError> {
        let texture = self.ctx.backend()?.create_texture(TextureKind::Lut)?;
        debug!(%texture, "lut texture created");
        Ok(texture)
    }

    /// Records a new surface size. Before initialization the size is only stored.
    ///
    /// A live pipeline re-issues the viewport and rebinds the camera texture;
    /// the program and parameters are left alone.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if self.sm.current() == RenderState::Released {
            return Err(RenderError::Released);
        }
        if width == 0 || height == 0 {
            debug!(width, height, "ignoring zero-sized surface");
            return Ok(());
        }
        if self.viewport == (width, height) {
            return Ok(());
        }
        self.viewport = (width, height);
        if self.sm.current() == RenderState::Uninitialized {
            return Ok(());
        }
        self.ctx.backend()?.set_viewport(width, height)?;
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.recreate(&mut self.ctx)?;
        }
        self.sm.on_viewport_changed();
        info!(width, height, "surface resized");
        Ok(())
    }

    /// Runs one frame: latch, bind, upload, draw.
    ///
    /// Context and surface losses are rebuilt in place and reported as
    /// [`FrameOutcome::Recovered`]; a surface timeout is [`FrameOutcome::Skipped`].
    /// Anything else is returned to the caller.
    pub fn render_frame(&mut self) -> Result<FrameReport, RenderError> {
        match self.sm.current() {
            RenderState::Released => return Err(RenderError::Released),
            RenderState::Uninitialized => {
                return Err(RenderError::NotReady {
                    state: RenderState::Uninitialized,
                });
            }
            _ => {}
        }
        let mut report = FrameReport {
            frame: FrameToken::Empty,
            lut_uploaded: false,
            params_generation: 0,
            outcome: FrameOutcome::Drawn,
        };
        match self.issue_frame(&mut report) {
            Ok(()) => {
                self.stats.drawn += 1;
                self.sm.on_drawn();
            }
            Err(RenderError::Backend(err)) if err.is_recoverable_loss() => {
                warn!(error = %err, "GPU binding lost, rebuilding");
                self.recover(&err)?;
                report.outcome = FrameOutcome::Recovered;
            }
            Err(RenderError::Backend(BackendError::Timeout)) => {
                debug!("surface timeout, frame skipped");
                self.stats.skipped += 1;
                report.outcome = FrameOutcome::Skipped;
            }
            Err(err) => return Err(err),
        }
        trace!(frame = ?report.frame, outcome = ?report.outcome, "frame finished");
        Ok(report)
    }

    fn issue_frame(&mut self, report: &mut FrameReport) -> Result<(), RenderError> {
        let (Some(program), Some(adapter), Some(lut_texture)) =
            (self.program, self.adapter.as_mut(), self.lut_texture)
        else {
            return Err(RenderError::NotReady {
                state: self.sm.current(),
            });
        };

        report.frame = adapter.acquire_latest_frame(&mut self.ctx)?;
        match report.frame {
            FrameToken::Fresh { .. } => self.stats.fresh += 1,
            FrameToken::Reused { .. } => self.stats.reused += 1,
            FrameToken::Empty => {}
        }
        let frame_texture = adapter.texture()?;

        let params = self.inputs.parameters();
        let lut = self.inputs.lut();
        let parallax = self.inputs.parallax();
        report.params_generation = params.generation;

        let backend = self.ctx.backend()?;
        backend.bind_program(program)?;
        backend.bind_frame(frame_texture)?;
        backend.upload_parameters(&params.value.to_uniform_block())?;
        if self.uploaded_lut != Some(lut.generation) {
            backend.upload_lut(lut_texture, &lut.value)?;
            self.uploaded_lut = Some(lut.generation);
            self.stats.lut_uploads += 1;
            report.lut_uploaded = true;
            debug!(generation = lut.generation, "lut uploaded");
        }
        backend.upload_parallax(parallax.to_uniform())?;
        backend.draw()?;
        Ok(())
    }

    fn recover(&mut self, cause: &BackendError) -> Result<(), RenderError> {
        if *cause == BackendError::ContextLost {
            if let Some(old) = self.program.take() {
                ignore_unknown(self.ctx.backend()?.delete_program(old))?;
            }
            self.program = Some(self.compile_program()?);
            if let Some(old) = self.lut_texture.take() {
                ignore_unknown(self.ctx.backend()?.delete_texture(old))?;
            }
            self.lut_texture = Some(self.create_lut_texture()?);
            self.uploaded_lut = None;
        }
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.recreate(&mut self.ctx)?;
        }
        let (width, height) = self.viewport;
        self.ctx.backend()?.set_viewport(width, height)?;
        self.stats.recoveries += 1;
        self.sm.on_viewport_changed();
        info!(cause = %cause, "GPU binding rebuilt");
        Ok(())
    }

    fn delete_handles(&mut self) -> Result<(), RenderError> {
        let mut first_err = None;
        if let Some(mut adapter) = self.adapter.take() {
            if let Err(err) = adapter.release(&mut self.ctx) {
                first_err.get_or_insert(err);
            }
        }
        if let Some(texture) = self.lut_texture.take() {
            let result = self
                .ctx
                .backend()
                .and_then(|backend| ignore_unknown(backend.delete_texture(texture)));
            if let Err(err) = result {
                first_err.get_or_insert(err);
            }
        }
        if let Some(program) = self.program.take() {
            let result = self
                .ctx
                .backend()
                .and_then(|backend| ignore_unknown(backend.delete_program(program)));
            if let Err(err) = result {
                first_err.get_or_insert(err);
            }
        }
        self.uploaded_lut = None;
        first_err.map_or(Ok(()), Err)
    }

    /// Deletes every GPU handle and enters the terminal `Released` state.
    ///
    /// The state is `Released` even when a delete fails; the error is still returned.
    pub fn release(&mut self) -> Result<RenderStats, RenderError> {
        if self.sm.current() == RenderState::Released {
            return Err(RenderError::Released);
        }
        let result = self.delete_handles();
        self.sm.on_release();
        info!(
            drawn = self.stats.drawn,
            lut_uploads = self.stats.lut_uploads,
            recoveries = self.stats.recoveries,
            "render pipeline released"
        );
        result.map(|()| self.stats)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if self.sm.current() != RenderState::Released {
            if let Err(err) = self.release() {
                warn!(error = %err, "release on drop failed");
            }
        }
    }
}
