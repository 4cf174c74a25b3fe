//! Second-order IIR filter with the classic RBJ cookbook responses.

use crate::block::FRAMES_PER_BLOCK;
use crate::context::Context;
use crate::error::Result;
use crate::node::{NodeRef, ProcessScope, Processor};
use crate::param::{ParamDescriptor, ParamRate, ParamRef};
use crate::port::{ChannelCountMode, ChannelInterpretation, InputPort};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::sync::Arc;

const FREQUENCY: usize = 0;
const Q: usize = 1;
const GAIN: usize = 2;

const PARAMS: &[ParamDescriptor] = &[
    ParamDescriptor {
        name: "frequency",
        default: 350.0,
        min: 10.0,
        max: 24_000.0,
        rate: ParamRate::Control,
    },
    ParamDescriptor {
        name: "q",
        default: 1.0,
        min: 0.0001,
        max: 1_000.0,
        rate: ParamRate::Control,
    },
    ParamDescriptor {
        name: "gain",
        default: 0.0,
        min: -40.0,
        max: 40.0,
        rate: ParamRate::Control,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
    Allpass,
    Peaking,
    LowShelf,
    HighShelf,
}

/// Filters its input with control-rate `frequency`, `q` and `gain` (dB;
/// shelf and peaking kinds only) parameters.
pub struct BiquadFilterNode {
    node: NodeRef,
    frequency: ParamRef,
    q: ParamRef,
    gain: ParamRef,
}

impl BiquadFilterNode {
    pub fn new(context: &Arc<Context>, kind: FilterKind) -> Result<Self> {
        let (node, mut params) = context.register(
            "biquad-filter",
            vec![InputPort::new(
                2,
                ChannelCountMode::Max,
                ChannelInterpretation::Speakers,
            )],
            1,
            PARAMS,
            Box::new(BiquadProcessor {
                kind,
                coefficients: Coefficients::passthrough(),
                configured: None,
                states: Vec::new(),
            }),
        )?;
        let gain = params.remove(GAIN);
        let q = params.remove(Q);
        let frequency = params.remove(FREQUENCY);
        Ok(Self {
            node,
            frequency,
            q,
            gain,
        })
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn frequency(&self) -> &ParamRef {
        &self.frequency
    }

    pub fn q(&self) -> &ParamRef {
        &self.q
    }

    pub fn gain(&self) -> &ParamRef {
        &self.gain
    }
}

/// Normalized Direct Form I coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Coefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Coefficients {
    fn passthrough() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl ChannelState {
    #[inline]
    fn tick(&mut self, c: &Coefficients, input: f64) -> f64 {
        let output =
            c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

struct BiquadProcessor {
    kind: FilterKind,
    coefficients: Coefficients,
    /// (frequency, q, gain) the coefficients were computed for.
    configured: Option<(f32, f32, f32)>,
    states: Vec<ChannelState>,
}

impl Processor for BiquadProcessor {
    fn process(&mut self, scope: &mut ProcessScope<'_>) -> Result<()> {
        let sample_rate = scope.sample_rate();
        let (inputs, mut outputs, params) = scope.parts();
        let Some(input) = inputs.buffer(0) else {
            return Ok(());
        };

        let frequency = params.values(FREQUENCY)[0];
        let q = params.values(Q)[0];
        let gain = params.values(GAIN)[0];
        if self.configured != Some((frequency, q, gain)) {
            self.coefficients = rbj_coefficients(self.kind, frequency, q, gain, sample_rate);
            self.configured = Some((frequency, q, gain));
        }

        let channels = input.channels();
        if self.states.len() != channels {
            self.states.resize_with(channels, ChannelState::default);
        }

        // Even a silent input runs through the filter so its tail rings out.
        let output = outputs.buffer_mut(0);
        for channel in 0..channels.min(output.channels()) {
            let source = input.channel(channel);
            let target = output.channel_mut(channel);
            let state = &mut self.states[channel];
            for frame in 0..FRAMES_PER_BLOCK {
                target[frame] = state.tick(&self.coefficients, source[frame] as f64) as f32;
            }
        }
        Ok(())
    }
}

/// Audio EQ Cookbook (RBJ) coefficient computation.
fn rbj_coefficients(
    kind: FilterKind,
    frequency: f32,
    q: f32,
    gain_db: f32,
    sample_rate: f64,
) -> Coefficients {
    let nyquist = sample_rate / 2.0;
    let f0 = (frequency as f64).clamp(1.0, nyquist * 0.999);
    let q = (q as f64).max(1e-4);
    let omega = TAU * f0 / sample_rate;
    let (sin, cos) = omega.sin_cos();
    let alpha = sin / (2.0 * q);
    let a = 10f64.powf(gain_db as f64 / 40.0);

    let (b0, b1, b2, a0, a1, a2) = match kind {
        FilterKind::Lowpass => {
            let b1 = 1.0 - cos;
            (b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos, 1.0 - alpha)
        }
        FilterKind::Highpass => {
            let b1 = -(1.0 + cos);
            (
                (1.0 + cos) / 2.0,
                b1,
                (1.0 + cos) / 2.0,
                1.0 + alpha,
                -2.0 * cos,
                1.0 - alpha,
            )
        }
        FilterKind::Bandpass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos, 1.0 - alpha),
        FilterKind::Notch => (1.0, -2.0 * cos, 1.0, 1.0 + alpha, -2.0 * cos, 1.0 - alpha),
        FilterKind::Allpass => (
            1.0 - alpha,
            -2.0 * cos,
            1.0 + alpha,
            1.0 + alpha,
            -2.0 * cos,
            1.0 - alpha,
        ),
        FilterKind::Peaking => (
            1.0 + alpha * a,
            -2.0 * cos,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos,
            1.0 - alpha / a,
        ),
        FilterKind::LowShelf => {
            let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
            (
                a * ((a + 1.0) - (a - 1.0) * cos + two_sqrt_a_alpha),
                2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
                a * ((a + 1.0) - (a - 1.0) * cos - two_sqrt_a_alpha),
                (a + 1.0) + (a - 1.0) * cos + two_sqrt_a_alpha,
                -2.0 * ((a - 1.0) + (a + 1.0) * cos),
                (a + 1.0) + (a - 1.0) * cos - two_sqrt_a_alpha,
            )
        }
        FilterKind::HighShelf => {
            let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
            (
                a * ((a + 1.0) + (a - 1.0) * cos + two_sqrt_a_alpha),
                -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
                a * ((a + 1.0) + (a - 1.0) * cos - two_sqrt_a_alpha),
                (a + 1.0) - (a - 1.0) * cos + two_sqrt_a_alpha,
                2.0 * ((a - 1.0) - (a + 1.0) * cos),
                (a + 1.0) - (a - 1.0) * cos - two_sqrt_a_alpha,
            )
        }
    };

    Coefficients {
        b0: b0 / a0,
        b1: b1 / a0,
        b2: b2 / a0,
        a1: a1 / a0,
        a2: a2 / a0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_magnitude(kind: FilterKind, test_hz: f64, cutoff: f32) -> f64 {
        // Run a sine through the filter and measure steady-state RMS.
        let sample_rate = 48_000.0;
        let coefficients = rbj_coefficients(kind, cutoff, 0.707, 0.0, sample_rate);
        let mut state = ChannelState::default();
        let mut sum = 0.0;
        let mut count = 0u32;
        for n in 0..9_600 {
            let input = (TAU * test_hz * n as f64 / sample_rate).sin();
            let output = state.tick(&coefficients, input);
            if n >= 4_800 {
                sum += output * output;
                count += 1;
            }
        }
        (sum / count as f64).sqrt() / (0.5f64).sqrt()
    }

    #[test]
    fn lowpass_passes_low_and_rejects_high() {
        assert!(response_magnitude(FilterKind::Lowpass, 100.0, 1_000.0) > 0.9);
        assert!(response_magnitude(FilterKind::Lowpass, 10_000.0, 1_000.0) < 0.05);
    }

    #[test]
    fn highpass_rejects_low_and_passes_high() {
        assert!(response_magnitude(FilterKind::Highpass, 100.0, 1_000.0) < 0.05);
        assert!(response_magnitude(FilterKind::Highpass, 10_000.0, 1_000.0) > 0.9);
    }

    #[test]
    fn notch_cuts_the_center_frequency() {
        assert!(response_magnitude(FilterKind::Notch, 1_000.0, 1_000.0) < 0.05);
        assert!(response_magnitude(FilterKind::Notch, 100.0, 1_000.0) > 0.9);
    }

    #[test]
    fn allpass_preserves_magnitude() {
        assert!((response_magnitude(FilterKind::Allpass, 1_000.0, 1_000.0) - 1.0).abs() < 0.05);
    }
}
