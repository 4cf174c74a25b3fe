//! A mono periodic source with audio-rate frequency and detune.

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::node::{Inputs, NodeMessage, NodeRef, ProcessScope, Processor};
use crate::nodes::schedule::SourceTimeline;
use crate::param::{ParamDescriptor, ParamRate, ParamRef};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const FREQUENCY: usize = 0;
const DETUNE: usize = 1;

const PARAMS: &[ParamDescriptor] = &[
    ParamDescriptor {
        name: "frequency",
        default: 440.0,
        min: -24_000.0,
        max: 24_000.0,
        rate: ParamRate::Audio,
    },
    ParamDescriptor {
        name: "detune",
        default: 0.0,
        min: -6_000.0,
        max: 6_000.0,
        rate: ParamRate::Audio,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OscillatorShape {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

pub struct OscillatorNode {
    node: NodeRef,
    frequency: ParamRef,
    detune: ParamRef,
    started: Arc<AtomicBool>,
}

impl OscillatorNode {
    pub fn new(context: &Arc<Context>, shape: OscillatorShape) -> Result<Self> {
        let (node, mut params) = context.register(
            "oscillator",
            Vec::new(),
            1,
            PARAMS,
            Box::new(OscillatorProcessor {
                shape,
                timeline: SourceTimeline::new(),
                phase: 0.0,
            }),
        )?;
        let detune = params.remove(DETUNE);
        let frequency = params.remove(FREQUENCY);
        Ok(Self {
            node,
            frequency,
            detune,
            started: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn frequency(&self) -> &ParamRef {
        &self.frequency
    }

    /// Pitch offset in cents.
    pub fn detune(&self) -> &ParamRef {
        &self.detune
    }

    /// Begins playback at `when` (non-positive means immediately). A second
    /// call is an invalid operation: the oscillator starts once.
    pub fn start(&self, when: f64) -> Result<()> {
        self.node.ensure_alive()?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::operation(
                "oscillator can only be started once",
            ));
        }
        self.node.post_message(NodeMessage::Start {
            when,
            offset: 0.0,
            duration: None,
        })
    }

    pub fn stop(&self, when: f64) -> Result<()> {
        self.node.post_message(NodeMessage::Stop { when })
    }

    pub fn set_on_ended(&self, callback: impl FnMut() + Send + 'static) -> Result<()> {
        self.node.set_on_ended(callback)
    }
}

struct OscillatorProcessor {
    shape: OscillatorShape,
    timeline: SourceTimeline,
    /// Normalized phase in [0, 1).
    phase: f64,
}

impl Processor for OscillatorProcessor {
    fn process(&mut self, scope: &mut ProcessScope<'_>) -> Result<()> {
        let sample_rate = scope.sample_rate();
        let plan = self
            .timeline
            .advance(scope.block_time(), scope.block_end_time(), sample_rate);
        if let Some((from, to)) = plan.window {
            let (_, mut outputs, params) = scope.parts();
            let frequency = params.values(FREQUENCY);
            let detune = params.values(DETUNE);
            let out = outputs.buffer_mut(0).channel_mut(0);
            for frame in from..to {
                let hz = frequency[frame] as f64 * (2f64).powf(detune[frame] as f64 / 1_200.0);
                out[frame] = waveform(self.shape, self.phase);
                self.phase = (self.phase + hz / sample_rate).rem_euclid(1.0);
            }
        }
        if plan.ended {
            scope.signal_ended();
        }
        Ok(())
    }

    fn output_channels(&self, _output: usize, _inputs: &Inputs<'_>) -> usize {
        1
    }

    fn message(&mut self, message: NodeMessage) {
        self.timeline.handle(message);
    }
}

fn waveform(shape: OscillatorShape, phase: f64) -> f32 {
    match shape {
        OscillatorShape::Sine => (phase * TAU).sin() as f32,
        OscillatorShape::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        OscillatorShape::Sawtooth => (2.0 * phase - 1.0) as f32,
        OscillatorShape::Triangle => {
            if phase < 0.5 {
                (4.0 * phase - 1.0) as f32
            } else {
                (3.0 - 4.0 * phase) as f32
            }
        }
    }
}
