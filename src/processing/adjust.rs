//! CPU evaluation of the adjustment fragment program.
//!
//! Mirrors `adjust.frag.wgsl` step for step so headless rendering and tests
//! see the same image a GPU would produce. Every step is written so that the
//! neutral parameter vector, a zero parallax offset, and the identity LUT
//! reproduce the source pixels bit for bit.

use crate::parallax::ParallaxOffset;
use crate::params::{ParamSlot, ParameterVector, UNIFORM_BLOCK_LEN};
use crate::processing::curve::Lut;

const LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

const FACE_CENTER: [f32; 2] = [0.5, 0.45];
const FACE_RADIUS: f32 = 0.3;
const LEFT_EYE: [f32; 2] = [0.4, 0.4];
const RIGHT_EYE: [f32; 2] = [0.6, 0.4];
const EYE_RADIUS: f32 = 0.08;
const CHIN_CENTER: [f32; 2] = [0.5, 0.7];
const CHIN_RADIUS: f32 = 0.15;
const NOSE_CENTER: [f32; 2] = [0.5, 0.5];
const NOSE_RADIUS: f32 = 0.06;

/// Values bound to the `params` and `parallax` uniforms for one draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustUniforms {
    pub params: [f32; UNIFORM_BLOCK_LEN],
    pub parallax: [f32; 4],
}

impl AdjustUniforms {
    pub fn new(params: &ParameterVector, parallax: ParallaxOffset) -> Self {
        Self {
            params: params.to_uniform_block(),
            parallax: parallax.to_uniform(),
        }
    }

    fn get(&self, slot: ParamSlot) -> f32 {
        self.params[slot.index()]
    }
}

impl Default for AdjustUniforms {
    fn default() -> Self {
        Self::new(&ParameterVector::neutral(), ParallaxOffset::ZERO)
    }
}

/// Borrowed RGBA8 source image.
#[derive(Debug, Clone, Copy)]
pub struct SourceImage<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [u8],
}

impl SourceImage<'_> {
    /// Nearest texel with clamp-to-edge addressing, channels in 0..1.
    fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        let x = texel_index(uv[0], self.width);
        let y = texel_index(uv[1], self.height);
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let px = &self.pixels[offset..offset + 4];
        [
            f32::from(px[0]) / 255.0,
            f32::from(px[1]) / 255.0,
            f32::from(px[2]) / 255.0,
            f32::from(px[3]) / 255.0,
        ]
    }
}

fn texel_index(coord: f32, extent: u32) -> u32 {
    let scaled = (coord * extent as f32).floor();
    if scaled.is_nan() || scaled < 0.0 {
        0
    } else {
        (scaled as u32).min(extent.saturating_sub(1))
    }
}

/// Renders a full `width` × `height` RGBA8 framebuffer.
pub fn render(
    source: &SourceImage<'_>,
    uniforms: &AdjustUniforms,
    lut: &Lut,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            out.extend_from_slice(&shade_pixel(source, uniforms, lut, x, y, width, height));
        }
    }
    out
}

/// Output pixel (x, y) of a `width` × `height` target.
pub fn shade_pixel(
    source: &SourceImage<'_>,
    uniforms: &AdjustUniforms,
    lut: &Lut,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> [u8; 4] {
    let screen_uv = [
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    ];
    let uv = [
        screen_uv[0] + uniforms.parallax[0],
        screen_uv[1] + uniforms.parallax[1],
    ];
    let uv = face_warp(uv, uniforms);
    let uv = [uv[0].clamp(0.0, 1.0), uv[1].clamp(0.0, 1.0)];

    let texel = [1.0 / source.width as f32, 1.0 / source.height as f32];
    let center = source.sample(uv);
    let alpha = center[3];
    let mut c = rgb(center);
    let neighbours = [
        rgb(source.sample([uv[0] + texel[0], uv[1]])),
        rgb(source.sample([uv[0] - texel[0], uv[1]])),
        rgb(source.sample([uv[0], uv[1] + texel[1]])),
        rgb(source.sample([uv[0], uv[1] - texel[1]])),
    ];
    let n = map3(|i| {
        (neighbours[0][i] + neighbours[1][i] + neighbours[2][i] + neighbours[3][i]) * 0.25
    });

    c = detail(c, n, uniforms);
    c = tone(c, uniforms);
    c = color(c, uniforms);
    c = beauty(c, uniforms);

    let d = [screen_uv[0] - 0.5, screen_uv[1] - 0.5];
    let falloff = (d[0] * d[0] + d[1] * d[1]) * 2.0;
    let vignette = 1.0 - uniforms.get(ParamSlot::Vignette) * falloff;
    c = map3(|i| c[i] * vignette);

    let noise = (grain_hash(x, y) & 0xffff) as f32 / 65535.0;
    let grain = (noise - 0.5) * (uniforms.get(ParamSlot::Grain) * 0.2);
    c = map3(|i| (c[i] + grain).clamp(0.0, 1.0));

    let mapped = lut.apply([lut_index(c[0]), lut_index(c[1]), lut_index(c[2])]);
    [mapped[0], mapped[1], mapped[2], (alpha * 255.0 + 0.5).floor() as u8]
}

fn lut_index(value: f32) -> u8 {
    (value * 255.0 + 0.5).floor().clamp(0.0, 255.0) as u8
}

/// Integer hash shared with the shader; all arithmetic wraps at 32 bits.
pub fn grain_hash(x: u32, y: u32) -> u32 {
    let mut h = x
        .wrapping_mul(374_761_393)
        .wrapping_add(y.wrapping_mul(668_265_263));
    h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
    h ^ (h >> 16)
}

fn face_warp(uv: [f32; 2], u: &AdjustUniforms) -> [f32; 2] {
    let thin = {
        let (d, f) = region(uv, FACE_CENTER, FACE_RADIUS);
        [d[0] * f * f * 0.25, 0.0]
    };
    let eyes = {
        let (dl, fl) = region(uv, LEFT_EYE, EYE_RADIUS);
        let (dr, fr) = region(uv, RIGHT_EYE, EYE_RADIUS);
        [
            -(dl[0] * fl + dr[0] * fr) * 0.5,
            -(dl[1] * fl + dr[1] * fr) * 0.5,
        ]
    };
    let chin = {
        let (_, f) = region(uv, CHIN_CENTER, CHIN_RADIUS);
        [0.0, f * f * 0.05]
    };
    let nose = {
        let (d, f) = region(uv, NOSE_CENTER, NOSE_RADIUS);
        [d[0] * f * 0.3, 0.0]
    };

    let mut uv = uv;
    for (vector, amount) in [
        (thin, u.get(ParamSlot::FaceThin)),
        (eyes, u.get(ParamSlot::EyeEnlarge)),
        (chin, u.get(ParamSlot::Chin)),
        (nose, u.get(ParamSlot::NoseBridge)),
    ] {
        uv = [uv[0] + vector[0] * amount, uv[1] + vector[1] * amount];
    }
    uv
}

/// Offset from `center` and a linear falloff that reaches 0 at `radius`.
fn region(uv: [f32; 2], center: [f32; 2], radius: f32) -> ([f32; 2], f32) {
    let d = [uv[0] - center[0], uv[1] - center[1]];
    let len = (d[0] * d[0] + d[1] * d[1]).sqrt();
    (d, (1.0 - len / radius).max(0.0))
}

fn detail(c: [f32; 3], n: [f32; 3], u: &AdjustUniforms) -> [f32; 3] {
    let denoise = u.get(ParamSlot::Denoise) * 0.8;
    let c = map3(|i| c[i] + (n[i] - c[i]) * denoise);

    let smoothing = u.get(ParamSlot::Beauty).max(u.get(ParamSlot::Smooth)) * skin_weight(c);
    let c = map3(|i| c[i] + (n[i] - c[i]) * smoothing);

    let sharpen = u.get(ParamSlot::Sharpness) * 2.0 + u.get(ParamSlot::Clarity);
    map3(|i| c[i] + (c[i] - n[i]) * sharpen)
}

fn tone(c: [f32; 3], u: &AdjustUniforms) -> [f32; 3] {
    let gain = (1.0 + u.get(ParamSlot::Iso) * 63.0)
        * ((u.get(ParamSlot::Shutter) - 0.5) * 12.0).exp2()
        * (u.get(ParamSlot::Exposure) * 3.0).exp2();
    let c = map3(|i| c[i] * gain);

    let dr = u.get(ParamSlot::DynamicRange);
    let c = map3(|i| c[i] / (1.0 + c[i] * dr) * (1.0 + dr));

    let l = luma(c).clamp(0.0, 1.0);
    let lift = 1.0
        + u.get(ParamSlot::Shadows) * ((1.0 - l) * (1.0 - l)) * 0.5
        + u.get(ParamSlot::Highlights) * (l * l) * 0.5;
    map3(|i| c[i] * lift)
}

fn color(c: [f32; 3], u: &AdjustUniforms) -> [f32; 3] {
    let dt = u.get(ParamSlot::Temperature) - crate::params::TEMPERATURE_NEUTRAL;
    let tint = u.get(ParamSlot::Tint);
    let c = [
        c[0] * (1.0 + dt * 0.5) * u.get(ParamSlot::RedGain),
        c[1] * (1.0 - tint * 0.2) * u.get(ParamSlot::GreenGain),
        c[2] * (1.0 - dt * 0.5) * u.get(ParamSlot::BlueGain),
    ];

    let haze = u.get(ParamSlot::Dehaze) * 0.1;
    let c = map3(|i| (c[i] - haze) / (1.0 - haze));

    let l = luma(c);
    let chroma = c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2]);
    let s = 1.0
        + u.get(ParamSlot::Saturation)
        + u.get(ParamSlot::ColorBoost) * (1.0 - chroma.clamp(0.0, 1.0));
    map3(|i| l * (1.0 - s) + c[i] * s)
}

fn beauty(c: [f32; 3], u: &AdjustUniforms) -> [f32; 3] {
    let w = skin_weight(c);
    let tone = u.get(ParamSlot::SkinTone) * w * 0.06;
    let redden = u.get(ParamSlot::Redden) * w * 0.08;
    let c = [c[0] + tone + redden, c[1], c[2] - tone];
    let whiten = u.get(ParamSlot::Whiten) * 0.2;
    map3(|i| c[i] + (1.0 - c[i]) * whiten)
}

/// Rough skin likelihood: red-dominant with green between red and blue.
fn skin_weight(c: [f32; 3]) -> f32 {
    let warm = ((c[0] - c[2]) * 3.0).clamp(0.0, 1.0);
    let balance = (1.0 - (c[1] - (c[0] + c[2]) * 0.5).abs() * 4.0).clamp(0.0, 1.0);
    warm * balance
}

fn luma(c: [f32; 3]) -> f32 {
    c[0] * LUMA[0] + c[1] * LUMA[1] + c[2] * LUMA[2]
}

fn rgb(c: [f32; 4]) -> [f32; 3] {
    [c[0], c[1], c[2]]
}

fn map3(f: impl Fn(usize) -> f32) -> [f32; 3] {
    [f(0), f(1), f(2)]
}
