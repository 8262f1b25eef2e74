//! Typed adjustment parameters and their uniform-array layout.
//!
//! Callers only ever touch named fields through setters; the single mapping
//! from fields to shader slots lives in [`ParameterVector::to_uniform_array`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of addressable adjustment slots uploaded to the shader.
pub const PARAM_COUNT: usize = 28;
/// Index of the reserved 29th slot.
pub const RESERVED_INDEX: usize = PARAM_COUNT;
/// Length of the std140 uniform block (`array<vec4<f32>, 8>`).
pub const UNIFORM_BLOCK_LEN: usize = 32;
/// Upper bound for per-channel gain multipliers.
pub const MAX_GAIN: f32 = 4.0;

pub const ISO_MIN: f32 = 100.0;
pub const ISO_MAX: f32 = 6400.0;
/// Shutter range is logarithmic: 2^-13 s (1/8192) to 2^-1 s (1/2).
pub const SHUTTER_MIN_LOG2: f32 = -13.0;
pub const SHUTTER_MAX_LOG2: f32 = -1.0;
/// 1/128 s maps to the middle of the shutter range.
pub const SHUTTER_NEUTRAL: f32 = 0.5;
pub const KELVIN_MIN: f32 = 2000.0;
pub const KELVIN_MAX: f32 = 10000.0;
pub const KELVIN_NEUTRAL: f32 = 6500.0;
/// Normalized value of [`KELVIN_NEUTRAL`]; exact in binary so the shader can compare against it.
pub const TEMPERATURE_NEUTRAL: f32 = 0.5625;
pub const EV_RANGE: f32 = 3.0;

/// Value domain of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDomain {
    /// 0..1
    Unit,
    /// -1..1
    Signed,
    /// 0..[`MAX_GAIN`]
    Gain,
}

impl ParamDomain {
    pub const fn range(self) -> (f32, f32) {
        match self {
            Self::Unit => (0.0, 1.0),
            Self::Signed => (-1.0, 1.0),
            Self::Gain => (0.0, MAX_GAIN),
        }
    }
}

/// Shader slot identity. Discriminants are uniform-array indices and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamSlot {
    Iso = 0,
    Shutter = 1,
    Exposure = 2,
    DynamicRange = 3,
    Shadows = 4,
    Highlights = 5,
    Temperature = 6,
    Tint = 7,
    Saturation = 8,
    SkinTone = 9,
    RedGain = 10,
    GreenGain = 11,
    BlueGain = 12,
    ColorBoost = 13,
    Sharpness = 14,
    Denoise = 15,
    Grain = 16,
    Vignette = 17,
    Clarity = 18,
    Dehaze = 19,
    Beauty = 20,
    Smooth = 21,
    FaceThin = 22,
    EyeEnlarge = 23,
    Whiten = 24,
    Redden = 25,
    Chin = 26,
    NoseBridge = 27,
    Reserved = 28,
}

impl ParamSlot {
    /// Every addressable slot in index order (excludes [`ParamSlot::Reserved`]).
    pub const ALL: [Self; PARAM_COUNT] = [
        Self::Iso,
        Self::Shutter,
        Self::Exposure,
        Self::DynamicRange,
        Self::Shadows,
        Self::Highlights,
        Self::Temperature,
        Self::Tint,
        Self::Saturation,
        Self::SkinTone,
        Self::RedGain,
        Self::GreenGain,
        Self::BlueGain,
        Self::ColorBoost,
        Self::Sharpness,
        Self::Denoise,
        Self::Grain,
        Self::Vignette,
        Self::Clarity,
        Self::Dehaze,
        Self::Beauty,
        Self::Smooth,
        Self::FaceThin,
        Self::EyeEnlarge,
        Self::Whiten,
        Self::Redden,
        Self::Chin,
        Self::NoseBridge,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Iso => "iso",
            Self::Shutter => "shutter",
            Self::Exposure => "exposure",
            Self::DynamicRange => "dynamic-range",
            Self::Shadows => "shadows",
            Self::Highlights => "highlights",
            Self::Temperature => "temperature",
            Self::Tint => "tint",
            Self::Saturation => "saturation",
            Self::SkinTone => "skin-tone",
            Self::RedGain => "red-gain",
            Self::GreenGain => "green-gain",
            Self::BlueGain => "blue-gain",
            Self::ColorBoost => "color-boost",
            Self::Sharpness => "sharpness",
            Self::Denoise => "denoise",
            Self::Grain => "grain",
            Self::Vignette => "vignette",
            Self::Clarity => "clarity",
            Self::Dehaze => "dehaze",
            Self::Beauty => "beauty",
            Self::Smooth => "smooth",
            Self::FaceThin => "face-thin",
            Self::EyeEnlarge => "eye-enlarge",
            Self::Whiten => "whiten",
            Self::Redden => "redden",
            Self::Chin => "chin",
            Self::NoseBridge => "nose-bridge",
            Self::Reserved => "reserved",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.name() == name)
    }

    pub const fn domain(self) -> ParamDomain {
        match self {
            Self::Exposure
            | Self::Shadows
            | Self::Highlights
            | Self::Tint
            | Self::Saturation
            | Self::SkinTone
            | Self::Clarity
            | Self::Chin
            | Self::Reserved => ParamDomain::Signed,
            Self::RedGain | Self::GreenGain | Self::BlueGain => ParamDomain::Gain,
            _ => ParamDomain::Unit,
        }
    }

    /// The value at which this slot leaves the image untouched.
    pub const fn neutral(self) -> f32 {
        match self {
            Self::Shutter => SHUTTER_NEUTRAL,
            Self::Temperature => TEMPERATURE_NEUTRAL,
            Self::RedGain | Self::GreenGain | Self::BlueGain => 1.0,
            _ => 0.0,
        }
    }

    /// Clamps into the slot's domain; non-finite input falls back to neutral.
    pub fn clamp(self, value: f32) -> f32 {
        if !value.is_finite() {
            return self.neutral();
        }
        let (lo, hi) = self.domain().range();
        value.clamp(lo, hi)
    }
}

impl fmt::Display for ParamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capture-side values in the units the camera hardware reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawDeviceUnits {
    /// ISO speed, 100..6400.
    pub iso_speed: Option<f32>,
    /// Exposure time in seconds, 1/8192..1/2.
    pub shutter_seconds: Option<f32>,
    /// Exposure compensation in stops, -3..+3.
    pub exposure_ev: Option<f32>,
    /// White balance color temperature, 2000..10000 K.
    pub kelvin: Option<f32>,
}

pub fn iso_to_normalized(iso: f32) -> f32 {
    normalize_linear(iso, ISO_MIN, ISO_MAX, 0.0)
}

pub fn normalized_to_iso(value: f32) -> f32 {
    ISO_MIN + ParamSlot::Iso.clamp(value) * (ISO_MAX - ISO_MIN)
}

pub fn shutter_to_normalized(seconds: f32) -> f32 {
    if seconds.is_nan() {
        return SHUTTER_NEUTRAL;
    }
    if seconds <= 0.0 {
        return 0.0;
    }
    normalize_linear(seconds.log2(), SHUTTER_MIN_LOG2, SHUTTER_MAX_LOG2, SHUTTER_NEUTRAL)
}

pub fn normalized_to_shutter(value: f32) -> f32 {
    let stops = SHUTTER_MIN_LOG2
        + ParamSlot::Shutter.clamp(value) * (SHUTTER_MAX_LOG2 - SHUTTER_MIN_LOG2);
    stops.exp2()
}

pub fn kelvin_to_normalized(kelvin: f32) -> f32 {
    normalize_linear(kelvin, KELVIN_MIN, KELVIN_MAX, TEMPERATURE_NEUTRAL)
}

pub fn normalized_to_kelvin(value: f32) -> f32 {
    KELVIN_MIN + ParamSlot::Temperature.clamp(value) * (KELVIN_MAX - KELVIN_MIN)
}

pub fn ev_to_normalized(ev: f32) -> f32 {
    ParamSlot::Exposure.clamp(ev / EV_RANGE)
}

pub fn normalized_to_ev(value: f32) -> f32 {
    ParamSlot::Exposure.clamp(value) * EV_RANGE
}

fn normalize_linear(value: f32, lo: f32, hi: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        return fallback;
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// The 28 adjustment values plus the reserved slot, always within domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ParameterVector {
    iso: f32,
    shutter: f32,
    exposure: f32,
    dynamic_range: f32,
    shadows: f32,
    highlights: f32,
    temperature: f32,
    tint: f32,
    saturation: f32,
    skin_tone: f32,
    red_gain: f32,
    green_gain: f32,
    blue_gain: f32,
    color_boost: f32,
    sharpness: f32,
    denoise: f32,
    grain: f32,
    vignette: f32,
    clarity: f32,
    dehaze: f32,
    beauty: f32,
    smooth: f32,
    face_thin: f32,
    eye_enlarge: f32,
    whiten: f32,
    redden: f32,
    chin: f32,
    nose_bridge: f32,
    reserved: f32,
}

impl Default for ParameterVector {
    fn default() -> Self {
        Self::neutral()
    }
}

macro_rules! named_setters {
    ($($setter:ident => $slot:ident),* $(,)?) => {
        $(
            pub fn $setter(&mut self, value: f32) -> &mut Self {
                self.set(ParamSlot::$slot, value)
            }
        )*
    };
}

impl ParameterVector {
    /// The no-op vector: every slot at its neutral value.
    pub const fn neutral() -> Self {
        Self {
            iso: 0.0,
            shutter: SHUTTER_NEUTRAL,
            exposure: 0.0,
            dynamic_range: 0.0,
            shadows: 0.0,
            highlights: 0.0,
            temperature: TEMPERATURE_NEUTRAL,
            tint: 0.0,
            saturation: 0.0,
            skin_tone: 0.0,
            red_gain: 1.0,
            green_gain: 1.0,
            blue_gain: 1.0,
            color_boost: 0.0,
            sharpness: 0.0,
            denoise: 0.0,
            grain: 0.0,
            vignette: 0.0,
            clarity: 0.0,
            dehaze: 0.0,
            beauty: 0.0,
            smooth: 0.0,
            face_thin: 0.0,
            eye_enlarge: 0.0,
            whiten: 0.0,
            redden: 0.0,
            chin: 0.0,
            nose_bridge: 0.0,
            reserved: 0.0,
        }
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::neutral()
    }

    pub fn from_raw_device_units(raw: &RawDeviceUnits) -> Self {
        let mut params = Self::neutral();
        params.apply_raw_device_units(raw);
        params
    }

    /// Overwrites only the fields present in `raw`.
    pub fn apply_raw_device_units(&mut self, raw: &RawDeviceUnits) -> &mut Self {
        if let Some(iso) = raw.iso_speed {
            self.iso = iso_to_normalized(iso);
        }
        if let Some(seconds) = raw.shutter_seconds {
            self.shutter = shutter_to_normalized(seconds);
        }
        if let Some(ev) = raw.exposure_ev {
            self.exposure = ev_to_normalized(ev);
        }
        if let Some(kelvin) = raw.kelvin {
            self.temperature = kelvin_to_normalized(kelvin);
        }
        self
    }

    pub fn to_raw_device_units(&self) -> RawDeviceUnits {
        RawDeviceUnits {
            iso_speed: Some(normalized_to_iso(self.iso)),
            shutter_seconds: Some(normalized_to_shutter(self.shutter)),
            exposure_ev: Some(normalized_to_ev(self.exposure)),
            kelvin: Some(normalized_to_kelvin(self.temperature)),
        }
    }

    pub fn get(&self, slot: ParamSlot) -> f32 {
        match slot {
            ParamSlot::Iso => self.iso,
            ParamSlot::Shutter => self.shutter,
            ParamSlot::Exposure => self.exposure,
            ParamSlot::DynamicRange => self.dynamic_range,
            ParamSlot::Shadows => self.shadows,
            ParamSlot::Highlights => self.highlights,
            ParamSlot::Temperature => self.temperature,
            ParamSlot::Tint => self.tint,
            ParamSlot::Saturation => self.saturation,
            ParamSlot::SkinTone => self.skin_tone,
            ParamSlot::RedGain => self.red_gain,
            ParamSlot::GreenGain => self.green_gain,
            ParamSlot::BlueGain => self.blue_gain,
            ParamSlot::ColorBoost => self.color_boost,
            ParamSlot::Sharpness => self.sharpness,
            ParamSlot::Denoise => self.denoise,
            ParamSlot::Grain => self.grain,
            ParamSlot::Vignette => self.vignette,
            ParamSlot::Clarity => self.clarity,
            ParamSlot::Dehaze => self.dehaze,
            ParamSlot::Beauty => self.beauty,
            ParamSlot::Smooth => self.smooth,
            ParamSlot::FaceThin => self.face_thin,
            ParamSlot::EyeEnlarge => self.eye_enlarge,
            ParamSlot::Whiten => self.whiten,
            ParamSlot::Redden => self.redden,
            ParamSlot::Chin => self.chin,
            ParamSlot::NoseBridge => self.nose_bridge,
            ParamSlot::Reserved => self.reserved,
        }
    }

    /// Clamps `value` into the slot's domain and stores it.
    pub fn set(&mut self, slot: ParamSlot, value: f32) -> &mut Self {
        let value = slot.clamp(value);
        let field = match slot {
            ParamSlot::Iso => &mut self.iso,
            ParamSlot::Shutter => &mut self.shutter,
            ParamSlot::Exposure => &mut self.exposure,
            ParamSlot::DynamicRange => &mut self.dynamic_range,
            ParamSlot::Shadows => &mut self.shadows,
            ParamSlot::Highlights => &mut self.highlights,
            ParamSlot::Temperature => &mut self.temperature,
            ParamSlot::Tint => &mut self.tint,
            ParamSlot::Saturation => &mut self.saturation,
            ParamSlot::SkinTone => &mut self.skin_tone,
            ParamSlot::RedGain => &mut self.red_gain,
            ParamSlot::GreenGain => &mut self.green_gain,
            ParamSlot::BlueGain => &mut self.blue_gain,
            ParamSlot::ColorBoost => &mut self.color_boost,
            ParamSlot::Sharpness => &mut self.sharpness,
            ParamSlot::Denoise => &mut self.denoise,
            ParamSlot::Grain => &mut self.grain,
            ParamSlot::Vignette => &mut self.vignette,
            ParamSlot::Clarity => &mut self.clarity,
            ParamSlot::Dehaze => &mut self.dehaze,
            ParamSlot::Beauty => &mut self.beauty,
            ParamSlot::Smooth => &mut self.smooth,
            ParamSlot::FaceThin => &mut self.face_thin,
            ParamSlot::EyeEnlarge => &mut self.eye_enlarge,
            ParamSlot::Whiten => &mut self.whiten,
            ParamSlot::Redden => &mut self.redden,
            ParamSlot::Chin => &mut self.chin,
            ParamSlot::NoseBridge => &mut self.nose_bridge,
            ParamSlot::Reserved => &mut self.reserved,
        };
        *field = value;
        self
    }

    named_setters! {
        set_iso => Iso,
        set_shutter => Shutter,
        set_exposure => Exposure,
        set_dynamic_range => DynamicRange,
        set_shadows => Shadows,
        set_highlights => Highlights,
        set_temperature => Temperature,
        set_tint => Tint,
        set_saturation => Saturation,
        set_skin_tone => SkinTone,
        set_red_gain => RedGain,
        set_green_gain => GreenGain,
        set_blue_gain => BlueGain,
        set_color_boost => ColorBoost,
        set_sharpness => Sharpness,
        set_denoise => Denoise,
        set_grain => Grain,
        set_vignette => Vignette,
        set_clarity => Clarity,
        set_dehaze => Dehaze,
        set_beauty => Beauty,
        set_smooth => Smooth,
        set_face_thin => FaceThin,
        set_eye_enlarge => EyeEnlarge,
        set_whiten => Whiten,
        set_redden => Redden,
        set_chin => Chin,
        set_nose_bridge => NoseBridge,
    }

    /// Maps every named field to its fixed slot index.
    pub fn to_uniform_array(&self) -> [f32; PARAM_COUNT] {
        let mut out = [0.0; PARAM_COUNT];
        for slot in ParamSlot::ALL {
            out[slot.index()] = self.get(slot);
        }
        out
    }

    /// The GPU upload layout: 28 slots, the reserved slot, then zero padding.
    pub fn to_uniform_block(&self) -> [f32; UNIFORM_BLOCK_LEN] {
        let mut block = [0.0; UNIFORM_BLOCK_LEN];
        block[..PARAM_COUNT].copy_from_slice(&self.to_uniform_array());
        block[RESERVED_INDEX] = self.reserved;
        block
    }
}
