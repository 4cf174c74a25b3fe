//! Equal-power stereo panning and distance attenuation laws.

use crate::block::FRAMES_PER_BLOCK;
use crate::context::Context;
use crate::error::Result;
use crate::node::{Inputs, NodeRef, ProcessScope, Processor};
use crate::param::{ParamDescriptor, ParamRate, ParamRef};
use crate::port::{ChannelCountMode, ChannelInterpretation, InputPort};
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

const PAN: usize = 0;

const PARAMS: &[ParamDescriptor] = &[ParamDescriptor {
    name: "pan",
    default: 0.0,
    min: -1.0,
    max: 1.0,
    rate: ParamRate::Control,
}];

/// Places a mono or stereo input in the stereo field with the equal-power
/// law. Always publishes two channels.
pub struct StereoPannerNode {
    node: NodeRef,
    pan: ParamRef,
}

impl StereoPannerNode {
    pub fn new(context: &Arc<Context>) -> Result<Self> {
        // Nominal 1 in max mode keeps a mono source mono at the port, so the
        // processor picks the pan law from the real upstream channel count.
        let (node, mut params) = context.register(
            "stereo-panner",
            vec![InputPort::new(
                1,
                ChannelCountMode::Max,
                ChannelInterpretation::Speakers,
            )],
            1,
            PARAMS,
            Box::new(PannerProcessor),
        )?;
        let pan = params.remove(PAN);
        Ok(Self { node, pan })
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    /// Position in [-1, 1]; -1 is hard left.
    pub fn pan(&self) -> &ParamRef {
        &self.pan
    }
}

struct PannerProcessor;

impl Processor for PannerProcessor {
    fn process(&mut self, scope: &mut ProcessScope<'_>) -> Result<()> {
        let (inputs, mut outputs, params) = scope.parts();
        let Some(input) = inputs.buffer(0) else {
            return Ok(());
        };
        if input.is_silent() {
            return Ok(());
        }

        let pan = params.values(PAN)[0].clamp(-1.0, 1.0);
        let output = outputs.buffer_mut(0);

        if input.channels() == 1 {
            let x = (pan + 1.0) / 2.0;
            let (gain_l, gain_r) = ((x * FRAC_PI_2).cos(), (x * FRAC_PI_2).sin());
            let source = input.channel(0);
            for frame in 0..FRAMES_PER_BLOCK {
                let sample = source[frame];
                output.channel_mut(0)[frame] = sample * gain_l;
                output.channel_mut(1)[frame] = sample * gain_r;
            }
        } else {
            // Stereo law: the retreating channel folds into the other side.
            let x = if pan <= 0.0 { pan + 1.0 } else { pan };
            let (gain_cos, gain_sin) = ((x * FRAC_PI_2).cos(), (x * FRAC_PI_2).sin());
            let left = input.channel(0);
            let right = input.channel(1);
            for frame in 0..FRAMES_PER_BLOCK {
                let (l, r) = (left[frame], right[frame]);
                let (out_l, out_r) = if pan <= 0.0 {
                    (l + r * gain_cos, r * gain_sin)
                } else {
                    (l * gain_cos, r + l * gain_sin)
                };
                output.channel_mut(0)[frame] = out_l;
                output.channel_mut(1)[frame] = out_r;
            }
        }
        Ok(())
    }

    fn output_channels(&self, _output: usize, _inputs: &Inputs<'_>) -> usize {
        2
    }
}

/// How gain falls off with distance from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceModel {
    Linear,
    Inverse,
    Exponential,
}

impl DistanceModel {
    /// Gain in [0, 1] for a listener `distance` away. `reference` is the
    /// distance of unity gain, `max` caps the linear model, `rolloff`
    /// steepens the curve.
    pub fn gain(&self, distance: f64, reference: f64, max: f64, rolloff: f64) -> f32 {
        let reference = reference.max(f64::EPSILON);
        match self {
            DistanceModel::Linear => {
                let max = max.max(reference);
                let clamped = distance.clamp(reference, max);
                let gain = 1.0 - rolloff * (clamped - reference) / (max - reference).max(f64::EPSILON);
                gain.clamp(0.0, 1.0) as f32
            }
            DistanceModel::Inverse => {
                let distance = distance.max(reference);
                (reference / (reference + rolloff * (distance - reference))) as f32
            }
            DistanceModel::Exponential => {
                let distance = distance.max(reference);
                (distance / reference).powf(-rolloff) as f32
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConstantSourceNode, OfflineRenderer};

    fn pan_mono_dc(pan: f32) -> Vec<Vec<f32>> {
        let context = Context::new(48_000.0).expect("context");
        let source = ConstantSourceNode::new(&context).expect("source");
        let panner = StereoPannerNode::new(&context).expect("panner");
        source.node().connect(0, panner.node(), 0).unwrap();
        panner.node().connect(0, &context.destination(), 0).unwrap();
        panner.pan().set_value(pan).unwrap();
        source.start(0.0).unwrap();

        let mut renderer = OfflineRenderer::new(Arc::clone(&context));
        let mut output = vec![vec![0.0; FRAMES_PER_BLOCK]; 2];
        renderer.render(&mut output, FRAMES_PER_BLOCK).expect("render");
        output
    }

    #[test]
    fn mono_source_takes_the_equal_power_law() {
        let output = pan_mono_dc(0.0);
        // Centered: both sides at cos(pi/4), not the stereo fold of a
        // duplicated channel.
        let expected = (0.5f32 * FRAC_PI_2).cos();
        assert!((output[0][0] - expected).abs() < 1e-6, "{}", output[0][0]);
        assert!((output[1][0] - expected).abs() < 1e-6, "{}", output[1][0]);
    }

    #[test]
    fn mono_source_pans_hard_left() {
        let output = pan_mono_dc(-1.0);
        assert!((output[0][0] - 1.0).abs() < 1e-6);
        assert!(output[1][0].abs() < 1e-6);
    }

    #[test]
    fn unity_gain_at_the_reference_distance() {
        for model in [
            DistanceModel::Linear,
            DistanceModel::Inverse,
            DistanceModel::Exponential,
        ] {
            assert!((model.gain(1.0, 1.0, 100.0, 1.0) - 1.0).abs() < 1e-6, "{model:?}");
        }
    }

    #[test]
    fn gain_decreases_with_distance() {
        for model in [
            DistanceModel::Linear,
            DistanceModel::Inverse,
            DistanceModel::Exponential,
        ] {
            let near = model.gain(2.0, 1.0, 100.0, 1.0);
            let far = model.gain(50.0, 1.0, 100.0, 1.0);
            assert!(far < near, "{model:?}: {far} vs {near}");
            assert!(far >= 0.0);
        }
    }

    #[test]
    fn linear_model_reaches_zero_at_max() {
        let gain = DistanceModel::Linear.gain(100.0, 1.0, 100.0, 1.0);
        assert!(gain.abs() < 1e-6);
        // Beyond max it stays clamped.
        assert_eq!(gain, DistanceModel::Linear.gain(500.0, 1.0, 100.0, 1.0));
    }
}
