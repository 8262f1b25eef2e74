//! The seam between the render loop and a concrete graphics API.
//!
//! Handles are opaque integers minted by the backend. Every operation that
//! touches GPU state goes through [`GpuBackend`], which is only reachable via
//! [`RenderContext`](super::RenderContext) on the thread that created it.

use std::fmt;

use crate::error::BackendError;
use crate::events::CameraFrame;
use crate::gpu::shader::ProgramLayout;
use crate::params::UNIFORM_BLOCK_LEN;
use crate::processing::curve::Lut;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

impl fmt::Display for ProgramHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// Camera-fed texture; contents replaced on each latch.
    External,
    /// 256×1 lookup table.
    Lut,
}

/// One backend call, as recorded by the headless backend.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    CreateProgram { handle: ProgramHandle, label: String },
    DeleteProgram(ProgramHandle),
    CreateTexture { handle: TextureHandle, kind: TextureKind },
    DeleteTexture(TextureHandle),
    LatchFrame { texture: TextureHandle, width: u32, height: u32 },
    SetViewport { width: u32, height: u32 },
    BindProgram(ProgramHandle),
    BindFrame(TextureHandle),
    UploadParameters([f32; UNIFORM_BLOCK_LEN]),
    UploadLut(TextureHandle),
    UploadParallax([f32; 4]),
    Draw,
}

impl GpuCommand {
    /// Short name for log fields and test assertions.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateProgram { .. } => "create-program",
            Self::DeleteProgram(_) => "delete-program",
            Self::CreateTexture { .. } => "create-texture",
            Self::DeleteTexture(_) => "delete-texture",
            Self::LatchFrame { .. } => "latch-frame",
            Self::SetViewport { .. } => "set-viewport",
            Self::BindProgram(_) => "bind-program",
            Self::BindFrame(_) => "bind-frame",
            Self::UploadParameters(_) => "upload-parameters",
            Self::UploadLut(_) => "upload-lut",
            Self::UploadParallax(_) => "upload-parallax",
            Self::Draw => "draw",
        }
    }
}

/// GPU operations used by the shader manager, frame adapter, and render loop.
///
/// Uniform uploads and draws apply to the most recently bound program and
/// frame texture; the LUT texture bound for drawing is the last one uploaded.
pub trait GpuBackend: Send {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn create_program(
        &mut self,
        label: &str,
        vertex: &str,
        fragment: &str,
        layout: &ProgramLayout,
    ) -> Result<ProgramHandle, BackendError>;

    fn delete_program(&mut self, program: ProgramHandle) -> Result<(), BackendError>;

    fn create_texture(&mut self, kind: TextureKind) -> Result<TextureHandle, BackendError>;

    fn delete_texture(&mut self, texture: TextureHandle) -> Result<(), BackendError>;

    /// Replaces the contents of an external texture with a camera frame.
    fn latch_frame(
        &mut self,
        texture: TextureHandle,
        frame: &CameraFrame,
    ) -> Result<(), BackendError>;

    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), BackendError>;

    fn bind_program(&mut self, program: ProgramHandle) -> Result<(), BackendError>;

    fn bind_frame(&mut self, texture: TextureHandle) -> Result<(), BackendError>;

    fn upload_parameters(&mut self, block: &[f32; UNIFORM_BLOCK_LEN]) -> Result<(), BackendError>;

    fn upload_lut(&mut self, texture: TextureHandle, lut: &Lut) -> Result<(), BackendError>;

    fn upload_parallax(&mut self, offset: [f32; 4]) -> Result<(), BackendError>;

    /// Draws the full-screen quad and presents it.
    fn draw(&mut self) -> Result<(), BackendError>;
}
