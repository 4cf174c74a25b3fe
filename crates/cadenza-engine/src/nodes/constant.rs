//! A mono source emitting its `offset` parameter.

use crate::context::Context;
use crate::error::Result;
use crate::node::{Inputs, NodeMessage, NodeRef, ProcessScope, Processor};
use crate::nodes::schedule::SourceTimeline;
use crate::param::{ParamDescriptor, ParamRate, ParamRef};
use std::sync::Arc;

const OFFSET: usize = 0;

const PARAMS: &[ParamDescriptor] = &[ParamDescriptor {
    name: "offset",
    default: 1.0,
    min: f32::MIN,
    max: f32::MAX,
    rate: ParamRate::Audio,
}];

/// Emits the audio-rate `offset` parameter between `start` and `stop`.
/// Useful on its own as DC, and as the workhorse for parameter modulation.
pub struct ConstantSourceNode {
    node: NodeRef,
    offset: ParamRef,
}

impl ConstantSourceNode {
    pub fn new(context: &Arc<Context>) -> Result<Self> {
        let (node, mut params) = context.register(
            "constant-source",
            Vec::new(),
            1,
            PARAMS,
            Box::new(ConstantProcessor {
                timeline: SourceTimeline::new(),
            }),
        )?;
        let offset = params.remove(OFFSET);
        Ok(Self { node, offset })
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn offset(&self) -> &ParamRef {
        &self.offset
    }

    /// Begins playback at `when` (non-positive means immediately). This is a
    /// free-form source: a second `start` is silently ignored.
    pub fn start(&self, when: f64) -> Result<()> {
        self.node.post_message(NodeMessage::Start {
            when,
            offset: 0.0,
            duration: None,
        })
    }

    pub fn stop(&self, when: f64) -> Result<()> {
        self.node.post_message(NodeMessage::Stop { when })
    }

    /// Registers the `ended` observer, invoked once on the render thread.
    pub fn set_on_ended(&self, callback: impl FnMut() + Send + 'static) -> Result<()> {
        self.node.set_on_ended(callback)
    }
}

struct ConstantProcessor {
    timeline: SourceTimeline,
}

impl Processor for ConstantProcessor {
    fn process(&mut self, scope: &mut ProcessScope<'_>) -> Result<()> {
        let plan = self.timeline.advance(
            scope.block_time(),
            scope.block_end_time(),
            scope.sample_rate(),
        );
        if let Some((from, to)) = plan.window {
            let (_, mut outputs, params) = scope.parts();
            let offset = params.values(OFFSET);
            let out = outputs.buffer_mut(0).channel_mut(0);
            out[from..to].copy_from_slice(&offset[from..to]);
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
