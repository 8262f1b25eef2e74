//! Publication slots shared between UI/sensor producers and the render loop.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::parallax::{ParallaxConfig, ParallaxIntegrator, ParallaxOffset, SensorSink};
use crate::params::ParameterVector;
use crate::processing::curve::{CurveSet, Lut};
use crate::slot::{Latest, OffsetCell, Snapshot};

/// Cheap to clone; every clone publishes into the same slots.
#[derive(Debug, Clone)]
pub struct RenderInputs {
    parameters: Arc<Latest<ParameterVector>>,
    lut: Arc<Latest<Lut>>,
    parallax: Arc<OffsetCell>,
}

impl Default for RenderInputs {
    fn default() -> Self {
        Self::new(ParameterVector::neutral(), Lut::identity())
    }
}

impl RenderInputs {
    pub fn new(parameters: ParameterVector, lut: Lut) -> Self {
        Self {
            parameters: Arc::new(Latest::new(parameters)),
            lut: Arc::new(Latest::new(lut)),
            parallax: Arc::new(OffsetCell::default()),
        }
    }

    /// Replaces the parameter vector; returns its generation.
    pub fn publish_parameters(&self, parameters: ParameterVector) -> u64 {
        let generation = self.parameters.publish(parameters);
        debug!(generation, "parameters published");
        generation
    }

    /// Regenerates the LUT on the calling thread and publishes it.
    pub fn publish_curves(&self, curves: &CurveSet) -> u64 {
        self.publish_lut(curves.generate())
    }

    pub fn publish_lut(&self, lut: Lut) -> u64 {
        let generation = self.lut.publish(lut);
        debug!(generation, "lut published");
        generation
    }

    pub fn publish_parallax(&self, offset: ParallaxOffset) {
        self.parallax.store(offset);
    }

    /// Producer handle for a gyroscope callback; `config` must pass validation.
    pub fn sensor_sink(&self, config: ParallaxConfig) -> Result<SensorSink> {
        let integrator = ParallaxIntegrator::new(config)?;
        Ok(SensorSink::new(integrator, Arc::clone(&self.parallax)))
    }

    pub fn parameters(&self) -> Snapshot<ParameterVector> {
        self.parameters.load()
    }

    pub fn lut(&self) -> Snapshot<Lut> {
        self.lut.load()
    }

    pub fn parallax(&self) -> ParallaxOffset {
        self.parallax.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::curve::CurveControlPoints;

    #[test]
    fn clones_share_slots() {
        let inputs = RenderInputs::default();
        let ui = inputs.clone();
        let mut params = ParameterVector::neutral();
        params.set_grain(0.3);
        ui.publish_parameters(params);
        assert_eq!(*inputs.parameters().value, params);

        let curves = CurveSet {
            composite: CurveControlPoints::new([(0.0, 1.0), (1.0, 0.0)]),
            ..CurveSet::identity()
        };
        assert_eq!(ui.publish_curves(&curves), 1);
        assert_eq!(inputs.lut().value.entry(0), [255; 3]);

        ui.sensor_sink(ParallaxConfig::default())
            .unwrap()
            .on_sample(1.0, 0.0);
        assert!(inputs.parallax().dx > 0.0);
    }

    #[test]
    fn sensor_sink_rejects_unusable_config() {
        let inputs = RenderInputs::default();
        for max_offset in [-0.05, f32::NAN] {
            let config = ParallaxConfig {
                max_offset,
                ..ParallaxConfig::default()
            };
            assert!(inputs.sensor_sink(config).is_err());
        }
        assert_eq!(inputs.parallax(), ParallaxOffset::ZERO);
    }
}
