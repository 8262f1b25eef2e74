//! A GPU-less backend that records every call and rasterizes on the CPU.
//!
//! Draws run the CPU reference of the adjustment shader, so the framebuffer a
//! test reads back is the image the GPU pipeline would produce. Faults can be
//! queued through the [`HeadlessProbe`] to exercise context and surface loss.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::BackendError;
use crate::events::CameraFrame;
use crate::gpu::backend::{GpuBackend, GpuCommand, ProgramHandle, TextureHandle, TextureKind};
use crate::gpu::shader::ProgramLayout;
use crate::params::UNIFORM_BLOCK_LEN;
use crate::processing::adjust::{self, AdjustUniforms, SourceImage};
use crate::processing::curve::Lut;

/// Most recent commands kept by the log; older ones are dropped.
pub const COMMAND_LOG_CAPACITY: usize = 4096;

/// Backend operations a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    CreateProgram,
    CreateTexture,
    LatchFrame,
    UploadLut,
    Draw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Framebuffer {
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
            self.pixels[offset + 3],
        ]
    }
}

#[derive(Debug)]
enum Texture {
    External(Option<CameraFrame>),
    Lut(Lut),
}

#[derive(Debug)]
struct HeadlessState {
    commands: VecDeque<GpuCommand>,
    next_id: u64,
    programs: HashMap<ProgramHandle, ProgramLayout>,
    textures: HashMap<TextureHandle, Texture>,
    viewport: (u32, u32),
    bound_program: Option<ProgramHandle>,
    bound_frame: Option<TextureHandle>,
    bound_lut: Option<TextureHandle>,
    uniforms: AdjustUniforms,
    framebuffer: Option<Framebuffer>,
    clear_color: [u8; 4],
    faults: Vec<(FaultPoint, BackendError)>,
    context_losses: u64,
}

impl HeadlessState {
    fn record(&mut self, command: GpuCommand) {
        if self.commands.len() == COMMAND_LOG_CAPACITY {
            self.commands.pop_front();
        }
        self.commands.push_back(command);
    }

    fn mint(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn fault(&mut self, point: FaultPoint) -> Result<(), BackendError> {
        let Some(pos) = self.faults.iter().position(|(p, _)| *p == point) else {
            return Ok(());
        };
        let (_, err) = self.faults.remove(pos);
        if err == BackendError::ContextLost {
            self.lose_context();
        }
        Err(err)
    }

    /// Every object dies with the context, as on a real device.
    fn lose_context(&mut self) {
        self.programs.clear();
        self.textures.clear();
        self.bound_program = None;
        self.bound_frame = None;
        self.bound_lut = None;
        self.context_losses += 1;
    }

    fn render(&self) -> Result<Framebuffer, BackendError> {
        let (width, height) = self.viewport;
        let frame = match self.bound_frame.and_then(|h| self.textures.get(&h)) {
            Some(Texture::External(frame)) => frame.as_ref(),
            _ => return Err(BackendError::Other("no frame texture bound".into())),
        };
        let lut = match self.bound_lut.and_then(|h| self.textures.get(&h)) {
            Some(Texture::Lut(lut)) => lut,
            _ => return Err(BackendError::Other("no lut texture bound".into())),
        };
        let pixels = match frame {
            Some(frame) => {
                let source = SourceImage {
                    width: frame.width(),
                    height: frame.height(),
                    pixels: frame.pixels(),
                };
                adjust::render(&source, &self.uniforms, lut, width, height)
            }
            None => self.clear_color.repeat(width as usize * height as usize),
        };
        Ok(Framebuffer {
            width,
            height,
            pixels,
        })
    }
}

/// Shared view into a [`HeadlessBackend`] that outlives its move into a render context.
#[derive(Debug, Clone)]
pub struct HeadlessProbe {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessProbe {
    /// The last [`COMMAND_LOG_CAPACITY`] commands, oldest first.
    pub fn commands(&self) -> Vec<GpuCommand> {
        self.state.lock().commands.iter().cloned().collect()
    }

    pub fn take_commands(&self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.state.lock().commands).into()
    }

    /// Number of recorded commands with the given [`GpuCommand::name`].
    pub fn count(&self, name: &str) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.name() == name)
            .count()
    }

    pub fn framebuffer(&self) -> Option<Framebuffer> {
        self.state.lock().framebuffer.clone()
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.state.lock().viewport
    }

    pub fn live_programs(&self) -> usize {
        self.state.lock().programs.len()
    }

    pub fn live_textures(&self) -> usize {
        self.state.lock().textures.len()
    }

    pub fn context_losses(&self) -> u64 {
        self.state.lock().context_losses
    }

    /// Makes the next call at `point` fail with `err`.
    pub fn fail_next(&self, point: FaultPoint, err: BackendError) {
        self.state.lock().faults.push((point, err));
    }
}

#[derive(Debug)]
pub struct HeadlessBackend {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessBackend {
    pub fn new() -> (Self, HeadlessProbe) {
        Self::with_clear_color([0, 0, 0])
    }

    pub fn with_clear_color(rgb: [u8; 3]) -> (Self, HeadlessProbe) {
        let state = Arc::new(Mutex::new(HeadlessState {
            commands: VecDeque::new(),
            next_id: 0,
            programs: HashMap::new(),
            textures: HashMap::new(),
            viewport: (1, 1),
            bound_program: None,
            bound_frame: None,
            bound_lut: None,
            uniforms: AdjustUniforms::default(),
            framebuffer: None,
            clear_color: [rgb[0], rgb[1], rgb[2], u8::MAX],
            faults: Vec::new(),
            context_losses: 0,
        }));
        let probe = HeadlessProbe {
            state: Arc::clone(&state),
        };
        (Self { state }, probe)
    }
}

impl GpuBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn create_program(
        &mut self,
        label: &str,
        _vertex: &str,
        _fragment: &str,
        layout: &ProgramLayout,
    ) -> Result<ProgramHandle, BackendError> {
        let mut state = self.state.lock();
        state.fault(FaultPoint::CreateProgram)?;
        let handle = ProgramHandle(state.mint());
        state.programs.insert(handle, layout.clone());
        state.record(GpuCommand::CreateProgram {
            handle,
            label: label.to_owned(),
        });
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state
            .programs
            .remove(&program)
            .ok_or(BackendError::UnknownHandle("program"))?;
        if state.bound_program == Some(program) {
            state.bound_program = None;
        }
        state.record(GpuCommand::DeleteProgram(program));
        Ok(())
    }

    fn create_texture(&mut self, kind: TextureKind) -> Result<TextureHandle, BackendError> {
        let mut state = self.state.lock();
        state.fault(FaultPoint::CreateTexture)?;
        let handle = TextureHandle(state.mint());
        let texture = match kind {
            TextureKind::External => Texture::External(None),
            TextureKind::Lut => Texture::Lut(Lut::identity()),
        };
        state.textures.insert(handle, texture);
        state.record(GpuCommand::CreateTexture { handle, kind });
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state
            .textures
            .remove(&texture)
            .ok_or(BackendError::UnknownHandle("texture"))?;
        if state.bound_frame == Some(texture) {
            state.bound_frame = None;
        }
        if state.bound_lut == Some(texture) {
            state.bound_lut = None;
        }
        state.record(GpuCommand::DeleteTexture(texture));
        Ok(())
    }

    fn latch_frame(
        &mut self,
        texture: TextureHandle,
        frame: &CameraFrame,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.fault(FaultPoint::LatchFrame)?;
        match state.textures.get_mut(&texture) {
            Some(Texture::External(slot)) => *slot = Some(frame.clone()),
            _ => return Err(BackendError::UnknownHandle("external texture")),
        }
        state.record(GpuCommand::LatchFrame {
            texture,
            width: frame.width(),
            height: frame.height(),
        });
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.viewport = (width.max(1), height.max(1));
        state.record(GpuCommand::SetViewport { width, height });
        Ok(())
    }

    fn bind_program(&mut self, program: ProgramHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if !state.programs.contains_key(&program) {
            return Err(BackendError::UnknownHandle("program"));
        }
        state.bound_program = Some(program);
        state.record(GpuCommand::BindProgram(program));
        Ok(())
    }

    fn bind_frame(&mut self, texture: TextureHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if !matches!(state.textures.get(&texture), Some(Texture::External(_))) {
            return Err(BackendError::UnknownHandle("external texture"));
        }
        state.bound_frame = Some(texture);
        state.record(GpuCommand::BindFrame(texture));
        Ok(())
    }

    fn upload_parameters(&mut self, block: &[f32; UNIFORM_BLOCK_LEN]) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.bound_program.is_none() {
            return Err(BackendError::Other("no program bound".into()));
        }
        state.uniforms.params = *block;
        state.record(GpuCommand::UploadParameters(*block));
        Ok(())
    }

    fn upload_lut(&mut self, texture: TextureHandle, lut: &Lut) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.fault(FaultPoint::UploadLut)?;
        match state.textures.get_mut(&texture) {
            Some(Texture::Lut(slot)) => *slot = lut.clone(),
            _ => return Err(BackendError::UnknownHandle("lut texture")),
        }
        state.bound_lut = Some(texture);
        state.record(GpuCommand::UploadLut(texture));
        Ok(())
    }

    fn upload_parallax(&mut self, offset: [f32; 4]) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.bound_program.is_none() {
            return Err(BackendError::Other("no program bound".into()));
        }
        state.uniforms.parallax = offset;
        state.record(GpuCommand::UploadParallax(offset));
        Ok(())
    }

    fn draw(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.fault(FaultPoint::Draw)?;
        if state.bound_program.is_none() {
            return Err(BackendError::Other("no program bound".into()));
        }
        let framebuffer = state.render()?;
        trace!(
            width = framebuffer.width,
            height = framebuffer.height,
            "headless draw"
        );
        state.framebuffer = Some(framebuffer);
        state.record(GpuCommand::Draw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn command_log_keeps_only_the_most_recent_commands() {
        let (mut backend, probe) = HeadlessBackend::new();
        let total = COMMAND_LOG_CAPACITY as u32 + 10;
        for width in 1..=total {
            backend.set_viewport(width, 1).unwrap();
        }
        let commands = probe.commands();
        assert_eq!(commands.len(), COMMAND_LOG_CAPACITY);
        assert_eq!(commands[0], GpuCommand::SetViewport { width: 11, height: 1 });
        assert_eq!(
            commands.last(),
            Some(&GpuCommand::SetViewport {
                width: total,
                height: 1
            })
        );
        assert_eq!(probe.take_commands().len(), COMMAND_LOG_CAPACITY);
        assert!(probe.commands().is_empty());
    }

    #[test]
    fn draw_without_frame_clears_to_clear_color() {
        let (mut backend, probe) = HeadlessBackend::with_clear_color([10, 20, 30]);
        let layout = crate::gpu::shader::validate(
            crate::gpu::shaders::ADJUST_VERTEX,
            crate::gpu::shaders::ADJUST_FRAGMENT,
            &crate::gpu::shaders::pipeline_requirements(),
        )
        .unwrap();
        let program = backend.create_program("test", "", "", &layout).unwrap();
        let frame = backend.create_texture(TextureKind::External).unwrap();
        let lut = backend.create_texture(TextureKind::Lut).unwrap();
        backend.set_viewport(2, 2).unwrap();
        backend.bind_program(program).unwrap();
        backend.bind_frame(frame).unwrap();
        backend.upload_lut(lut, &Lut::identity()).unwrap();
        backend.draw().unwrap();

        let fb = probe.framebuffer().unwrap();
        assert_eq!(fb.pixel(1, 1), [10, 20, 30, 255]);

        let camera = CameraFrame::new(2, 2, vec![7u8; 16], Duration::ZERO).unwrap();
        backend.latch_frame(frame, &camera).unwrap();
        backend.draw().unwrap();
        assert_eq!(probe.framebuffer().unwrap().pixels, vec![7u8; 16]);
    }

    #[test]
    fn context_loss_invalidates_every_handle() {
        let (mut backend, probe) = HeadlessBackend::new();
        let texture = backend.create_texture(TextureKind::External).unwrap();
        probe.fail_next(FaultPoint::Draw, BackendError::ContextLost);
        assert_eq!(backend.draw(), Err(BackendError::ContextLost));
        assert_eq!(probe.live_textures(), 0);
        assert_eq!(probe.context_losses(), 1);
        assert_eq!(
            backend.bind_frame(texture),
            Err(BackendError::UnknownHandle("external texture"))
        );
    }
}
