pub mod config;
pub mod error;
pub mod events;
pub mod frame_source;
pub mod gpu;
pub mod inputs;
pub mod parallax;
pub mod params;
pub mod processing;
pub mod slot;
pub mod tasks {
    pub mod preview;
    pub mod render_thread;
    pub mod renderer;
    pub mod synthetic;
}

pub use error::{BackendError, RenderError, ShaderError};
pub use events::{CameraFrame, SurfaceReady};
pub use frame_source::{FrameSink, FrameSourceAdapter, FrameStats, FrameToken};
pub use inputs::RenderInputs;
pub use parallax::{ParallaxConfig, ParallaxIntegrator, ParallaxOffset, SensorSink};
pub use params::{ParamSlot, ParameterVector, RawDeviceUnits};
pub use processing::curve::{CurveControlPoints, CurveSet, Lut};
pub use tasks::render_thread::{BackendFactory, RenderThreadConfig, RenderThreadHandle};
pub use tasks::renderer::{
    FrameOutcome, FrameReport, RenderState, RenderStats, Renderer, ShaderSources,
};
