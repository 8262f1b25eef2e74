use thiserror::Error;

use crate::gpu::shader::{BindingKind, ShaderStage};
use crate::tasks::renderer::RenderState;

/// Shader compilation, link, and reflection failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShaderError {
    /// A single stage failed to parse or validate.
    #[error("{stage} shader failed to compile:\n{diagnostic}")]
    Compile {
        stage: ShaderStage,
        diagnostic: String,
    },

    /// Both stages compiled but their interfaces do not match.
    #[error("program failed to link: {log}")]
    Link { log: String },

    /// An expected uniform, texture, sampler, or attribute is absent after link.
    #[error("linked program is missing {kind} `{name}`")]
    MissingBinding { kind: BindingKind, name: String },

    /// The GPU backend refused a program that passed validation.
    #[error("backend rejected program: {0}")]
    Backend(String),
}

/// Failures reported by a [`GpuBackend`](crate::gpu::backend::GpuBackend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("GPU context lost")]
    ContextLost,

    #[error("presentation surface lost or outdated")]
    SurfaceLost,

    #[error("timed out acquiring the presentation surface")]
    Timeout,

    #[error("GPU out of memory")]
    OutOfMemory,

    #[error("unknown {0} handle")]
    UnknownHandle(&'static str),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Losses the render loop recovers from by rebuilding its GPU bindings.
    pub fn is_recoverable_loss(&self) -> bool {
        matches!(self, Self::ContextLost | Self::SurfaceLost)
    }
}

/// Library error type for the rendering core.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error("failed to create frame surface: {0}")]
    SurfaceCreation(String),

    /// Any call into a pipeline, adapter, or sink after release.
    #[error("render pipeline already released")]
    Released,

    #[error("render pipeline is not ready (state: {state:?})")]
    NotReady { state: RenderState },

    #[error("render pipeline already initialized (state: {state:?})")]
    AlreadyInitialized { state: RenderState },

    /// GPU work attempted from a thread other than the one owning the context.
    #[error("GPU call issued off the render thread")]
    WrongThread,

    #[error("camera frame {width}x{height} needs {expected} bytes, got {actual}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to spawn render thread")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("render thread exited unexpectedly")]
    ThreadGone,

    #[error("render thread panicked: {0}")]
    ThreadPanicked(String),
}
