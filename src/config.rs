use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use serde::Deserialize;

use crate::parallax::ParallaxConfig;
use crate::params::{ParamSlot, ParameterVector, RawDeviceUnits};
use crate::processing::curve::CurveSet;
use crate::tasks::render_thread::RenderThreadConfig;
use crate::tasks::renderer::ShaderSources;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Time between frames on the render thread.
    #[serde(with = "humantime_serde")]
    pub frame_interval: Duration,
    pub initial_width: u32,
    pub initial_height: u32,
    /// Drawn until the first camera frame arrives.
    pub clear_color: [u8; 3],
    /// WGSL overriding the built-in vertex stage.
    pub vertex_shader: Option<PathBuf>,
    /// WGSL overriding the built-in fragment stage.
    pub fragment_shader: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(16),
            initial_width: 1280,
            initial_height: 720,
            clear_color: [0, 0, 0],
            vertex_shader: None,
            fragment_shader: None,
        }
    }
}

impl RenderConfig {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.frame_interval >= Duration::from_millis(1),
            "render.frame-interval must be at least 1ms"
        );
        ensure!(
            self.initial_width > 0 && self.initial_height > 0,
            "render.initial-width and render.initial-height must be non-zero"
        );
        Ok(())
    }

    /// Reads any shader overrides, falling back to the built-in WGSL.
    pub fn shader_sources(&self) -> Result<ShaderSources> {
        let mut sources = ShaderSources::default();
        if let Some(path) = &self.vertex_shader {
            sources.vertex = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read vertex shader {}", path.display()))?;
        }
        if let Some(path) = &self.fragment_shader {
            sources.fragment = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read fragment shader {}", path.display()))?;
        }
        Ok(sources)
    }

    pub fn thread_config(&self) -> Result<RenderThreadConfig> {
        Ok(RenderThreadConfig {
            frame_interval: self.frame_interval,
            viewport: (self.initial_width, self.initial_height),
            sources: self.shader_sources()?,
        })
    }
}

/// Partial parameter set keyed by device unit or slot name.
///
/// Device keys (`iso-speed`, `shutter-seconds`, `exposure-ev`, `kelvin`) are
/// converted first; every other key names a normalized slot. Values are
/// clamped like any other parameter write.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct PresetConfig {
    pub values: BTreeMap<String, f32>,
}

impl PresetConfig {
    const DEVICE_KEYS: [(&'static str, ParamSlot); 4] = [
        ("iso-speed", ParamSlot::Iso),
        ("shutter-seconds", ParamSlot::Shutter),
        ("exposure-ev", ParamSlot::Exposure),
        ("kelvin", ParamSlot::Temperature),
    ];

    pub fn build(&self) -> Result<ParameterVector> {
        let mut raw = RawDeviceUnits::default();
        let mut normalized = Vec::new();
        for (key, &value) in &self.values {
            match key.as_str() {
                "iso-speed" => raw.iso_speed = Some(value),
                "shutter-seconds" => raw.shutter_seconds = Some(value),
                "exposure-ev" => raw.exposure_ev = Some(value),
                "kelvin" => raw.kelvin = Some(value),
                name => match ParamSlot::from_name(name) {
                    Some(ParamSlot::Reserved) => bail!("slot `reserved` cannot be set"),
                    Some(slot) => normalized.push((slot, value)),
                    None => bail!("unknown parameter `{name}`"),
                },
            }
        }
        for (device_key, slot) in Self::DEVICE_KEYS {
            ensure!(
                !(self.values.contains_key(device_key) && self.values.contains_key(slot.name())),
                "`{device_key}` and `{}` set the same slot",
                slot.name()
            );
        }
        let mut params = ParameterVector::from_raw_device_units(&raw);
        for (slot, value) in normalized {
            params.set(slot, value);
        }
        Ok(params)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SyntheticConfig {
    pub camera_fps: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub gyro_hz: u32,
    /// Peak angular velocity of the simulated sway, rad/s.
    pub gyro_amplitude: f32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            camera_fps: 30,
            frame_width: 640,
            frame_height: 480,
            gyro_hz: 100,
            gyro_amplitude: 0.8,
        }
    }
}

impl SyntheticConfig {
    fn validate(&self) -> Result<()> {
        ensure!(
            (1..=240).contains(&self.camera_fps),
            "synthetic.camera-fps must be within 1..=240"
        );
        ensure!(
            self.frame_width > 0 && self.frame_height > 0,
            "synthetic.frame-width and synthetic.frame-height must be non-zero"
        );
        ensure!(
            (1..=1000).contains(&self.gyro_hz),
            "synthetic.gyro-hz must be within 1..=1000"
        );
        ensure!(
            self.gyro_amplitude.is_finite() && self.gyro_amplitude >= 0.0,
            "synthetic.gyro-amplitude must be non-negative"
        );
        Ok(())
    }

    pub fn camera_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.camera_fps.max(1)))
    }

    pub fn gyro_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.gyro_hz.max(1)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    pub render: RenderConfig,
    pub parallax: ParallaxConfig,
    /// Tone curves applied when the pipeline starts.
    pub curves: CurveSet,
    pub presets: BTreeMap<String, PresetConfig>,
    /// Preset applied at start-up.
    pub active_preset: Option<String>,
    pub synthetic: SyntheticConfig,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_yaml::from_str(&s).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        self.render.validate()?;
        self.parallax
            .validate()
            .context("invalid parallax configuration")?;
        self.synthetic.validate()?;
        for (name, preset) in &self.presets {
            preset
                .build()
                .with_context(|| format!("invalid preset `{name}`"))?;
        }
        if let Some(name) = &self.active_preset {
            ensure!(
                self.presets.contains_key(name),
                "active-preset `{name}` is not defined under presets"
            );
        }
        Ok(self)
    }

    /// Parameters for `name`, or the active preset, or neutral.
    pub fn initial_parameters(&self, name: Option<&str>) -> Result<ParameterVector> {
        let Some(name) = name.or(self.active_preset.as_deref()) else {
            return Ok(ParameterVector::neutral());
        };
        let preset = self
            .presets
            .get(name)
            .with_context(|| format!("unknown preset `{name}`"))?;
        preset.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{iso_to_normalized, kelvin_to_normalized};

    #[test]
    fn empty_document_gives_defaults() {
        let cfg: Configuration = serde_yaml::from_str("{}").unwrap();
        let cfg = cfg.validated().unwrap();
        assert_eq!(cfg.render.frame_interval, Duration::from_millis(16));
        assert_eq!((cfg.render.initial_width, cfg.render.initial_height), (1280, 720));
        assert_eq!(cfg.parallax, ParallaxConfig::default());
        assert!(cfg.curves.generate().is_identity());
        assert_eq!(cfg.synthetic.camera_fps, 30);
        assert!(cfg.initial_parameters(None).unwrap().is_neutral());
    }

    #[test]
    fn preset_mixes_device_and_slot_keys() {
        let yaml = r#"
iso-speed: 800
kelvin: 4000
saturation: 0.25
red-gain: 9.0
"#;
        let preset: PresetConfig = serde_yaml::from_str(yaml).unwrap();
        let params = preset.build().unwrap();
        assert_eq!(params.get(ParamSlot::Iso), iso_to_normalized(800.0));
        assert_eq!(params.get(ParamSlot::Temperature), kelvin_to_normalized(4000.0));
        assert_eq!(params.get(ParamSlot::Saturation), 0.25);
        assert_eq!(params.get(ParamSlot::RedGain), 4.0);
    }

    #[test]
    fn preset_rejects_unknown_and_conflicting_keys() {
        let unknown: PresetConfig = serde_yaml::from_str("sparkle: 1.0").unwrap();
        assert!(unknown.build().is_err());

        let reserved: PresetConfig = serde_yaml::from_str("reserved: 1.0").unwrap();
        assert!(reserved.build().is_err());

        let conflict: PresetConfig = serde_yaml::from_str("kelvin: 5000\ntemperature: 0.2").unwrap();
        assert!(conflict.build().is_err());
    }

    #[test]
    fn active_preset_must_exist() {
        let yaml = r#"
presets:
  warm:
    kelvin: 3500
active-preset: cool
"#;
        let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validated().is_err());
    }

    #[test]
    fn invalid_parallax_is_rejected() {
        let yaml = "parallax:\n  max-offset: 0.5\n";
        let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validated().is_err());
    }

    #[test]
    fn unknown_top_level_key_fails_to_parse() {
        assert!(serde_yaml::from_str::<Configuration>("watch-directory: /tmp").is_err());
    }
}
