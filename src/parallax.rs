//! Gyroscope-driven texture-coordinate offset.
//!
//! The offset is a stateless function of the latest angular-velocity sample:
//! scale, snap small components to zero, clamp. There is no integration over
//! time, so a stationary device always renders at exactly (0, 0).

use std::sync::Arc;

use anyhow::{Result, ensure};
use serde::Deserialize;

use crate::slot::OffsetCell;

/// Normalized texture-coordinate shift applied before sampling the frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParallaxOffset {
    pub dx: f32,
    pub dy: f32,
}

impl ParallaxOffset {
    pub const ZERO: Self = Self { dx: 0.0, dy: 0.0 };

    /// std140 `vec4<f32>` payload for the parallax uniform.
    pub fn to_uniform(self) -> [f32; 4] {
        [self.dx, self.dy, 0.0, 0.0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ParallaxConfig {
    /// Texture-coordinate units per rad/s of angular velocity.
    pub sensitivity: f32,
    /// Largest absolute offset per axis.
    pub max_offset: f32,
    /// Offsets with smaller magnitude snap to zero.
    pub dead_zone: f32,
}

impl Default for ParallaxConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.02,
            max_offset: 0.05,
            dead_zone: 0.002,
        }
    }
}

impl ParallaxConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.sensitivity.is_finite() && self.sensitivity > 0.0,
            "parallax sensitivity must be positive"
        );
        ensure!(
            self.max_offset > 0.0 && self.max_offset <= 0.1,
            "parallax max-offset must be in (0, 0.1]"
        );
        ensure!(
            self.dead_zone >= 0.0 && self.dead_zone < self.max_offset,
            "parallax dead-zone must be non-negative and below max-offset"
        );
        Ok(())
    }

    /// Angular velocity (rad/s) below which an axis produces no offset.
    pub fn velocity_dead_zone(&self) -> f32 {
        self.dead_zone / self.sensitivity
    }

    /// Angular velocity (rad/s) at and above which an axis saturates.
    pub fn velocity_saturation(&self) -> f32 {
        self.max_offset / self.sensitivity
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParallaxIntegrator {
    config: ParallaxConfig,
}

impl ParallaxIntegrator {
    /// Fails on a config `validate` rejects, so `update` never clamps against
    /// an empty or NaN range.
    pub fn new(config: ParallaxConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ParallaxConfig {
        &self.config
    }

    /// Maps angular velocity (rad/s) on each axis to a bounded offset.
    pub fn update(&self, angular_velocity_x: f32, angular_velocity_y: f32) -> ParallaxOffset {
        ParallaxOffset {
            dx: self.axis(angular_velocity_x),
            dy: self.axis(angular_velocity_y),
        }
    }

    fn axis(&self, velocity: f32) -> f32 {
        if !velocity.is_finite() {
            return 0.0;
        }
        let max = self.config.max_offset;
        let offset = (velocity * self.config.sensitivity).clamp(-max, max);
        if offset.abs() < self.config.dead_zone {
            0.0
        } else {
            offset
        }
    }
}

/// Sensor-thread side: computes the offset and publishes it for the render loop.
#[derive(Debug, Clone)]
pub struct SensorSink {
    integrator: ParallaxIntegrator,
    slot: Arc<OffsetCell>,
}

impl SensorSink {
    pub(crate) fn new(integrator: ParallaxIntegrator, slot: Arc<OffsetCell>) -> Self {
        Self { integrator, slot }
    }

    pub fn on_sample(&self, angular_velocity_x: f32, angular_velocity_y: f32) -> ParallaxOffset {
        let offset = self
            .integrator
            .update(angular_velocity_x, angular_velocity_y);
        self.slot.store(offset);
        offset
    }
}
