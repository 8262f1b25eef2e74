//! Built-in WGSL for the adjustment pipeline and the names it must expose.

use crate::gpu::shader::BindingRequirements;

pub const ADJUST_VERTEX: &str = include_str!("shaders/adjust.vert.wgsl");
pub const ADJUST_FRAGMENT: &str = include_str!("shaders/adjust.frag.wgsl");

pub const PARAMS_UNIFORM: &str = "params";
pub const PARALLAX_UNIFORM: &str = "parallax";
pub const FRAME_TEXTURE: &str = "frame";
pub const FRAME_SAMPLER: &str = "frame_sampler";
pub const LUT_TEXTURE: &str = "lut";
pub const POSITION_ATTRIBUTE: &str = "position";
pub const UV_ATTRIBUTE: &str = "uv";

/// Everything the render loop binds by name; custom shaders must expose all of it.
pub fn pipeline_requirements() -> BindingRequirements {
    BindingRequirements::new()
        .uniform(PARAMS_UNIFORM)
        .uniform(PARALLAX_UNIFORM)
        .texture(FRAME_TEXTURE)
        .sampler(FRAME_SAMPLER)
        .texture(LUT_TEXTURE)
        .attribute(POSITION_ATTRIBUTE)
        .attribute(UV_ATTRIBUTE)
}
