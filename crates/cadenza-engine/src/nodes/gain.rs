//! Per-sample amplitude scaling with an audio-rate `gain` parameter.

use crate::block::FRAMES_PER_BLOCK;
use crate::context::Context;
use crate::error::Result;
use crate::node::{NodeRef, ProcessScope, Processor};
use crate::param::{ParamDescriptor, ParamRate, ParamRef};
use crate::port::{ChannelCountMode, ChannelInterpretation, InputPort};
use std::sync::Arc;

const GAIN: usize = 0;

const PARAMS: &[ParamDescriptor] = &[ParamDescriptor {
    name: "gain",
    default: 1.0,
    min: f32::MIN,
    max: f32::MAX,
    rate: ParamRate::Audio,
}];

pub struct GainNode {
    node: NodeRef,
    gain: ParamRef,
}

impl GainNode {
    pub fn new(context: &Arc<Context>) -> Result<Self> {
        let (node, mut params) = context.register(
            "gain",
            vec![InputPort::new(
                2,
                ChannelCountMode::Max,
                ChannelInterpretation::Speakers,
            )],
            1,
            PARAMS,
            Box::new(GainProcessor),
        )?;
        let gain = params.remove(GAIN);
        Ok(Self { node, gain })
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn gain(&self) -> &ParamRef {
        &self.gain
    }
}

struct GainProcessor;

impl Processor for GainProcessor {
    fn process(&mut self, scope: &mut ProcessScope<'_>) -> Result<()> {
        let (inputs, mut outputs, params) = scope.parts();
        let Some(input) = inputs.buffer(0) else {
            return Ok(());
        };
        // Silent input: the cleared output stands and stays flagged silent.
        if input.is_silent() {
            return Ok(());
        }
        let gain = params.values(GAIN);
        let output = outputs.buffer_mut(0);
        for channel in 0..input.channels().min(output.channels()) {
            let source = input.channel(channel);
            let target = output.channel_mut(channel);
            for frame in 0..FRAMES_PER_BLOCK {
                target[frame] = source[frame] * gain[frame];
            }
        }
        Ok(())
    }
}
