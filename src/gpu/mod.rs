pub mod backend;
pub mod context;
pub mod headless;
pub mod shader;
pub mod shaders;
pub mod wgpu_backend;

pub use backend::{GpuBackend, GpuCommand, ProgramHandle, TextureHandle, TextureKind};
pub use context::RenderContext;
pub use headless::{HeadlessBackend, HeadlessProbe};
pub use shader::{BindingKind, BindingRequirements, ProgramLayout, ShaderStage};
pub use wgpu_backend::WgpuBackend;
