//! Node identity, the processing trait and the control-plane node handle.

use crate::block::{BlockBuffer, FRAMES_PER_BLOCK, MAX_CHANNELS, MIN_CHANNELS};
use crate::command::Command;
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::param::{AudioParam, ParamRef};
use crate::port::{ChannelCountMode, ChannelInterpretation, InputPort, OutputPort};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide monotonic node identity. Two nodes are equal iff their ids
/// match, across contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling messages delivered to a node on the render thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeMessage {
    Start {
        when: f64,
        offset: f64,
        duration: Option<f64>,
    },
    Stop {
        when: f64,
    },
}

/// The per-node processing capability. One implementation per node variant;
/// the engine drives it through [`crate::graph::GraphArena`].
pub trait Processor: Send {
    /// Renders one block. Output buffers arrive cleared; a processor that
    /// writes nothing publishes silence.
    fn process(&mut self, scope: &mut ProcessScope<'_>) -> Result<()>;

    /// Channel count this output will publish, given the pulled inputs.
    /// Defaults to following the first input, or mono for sources.
    fn output_channels(&self, output: usize, inputs: &Inputs<'_>) -> usize {
        let _ = output;
        if inputs.count() == 0 {
            1
        } else {
            inputs.channels(0)
        }
    }

    /// Handles a scheduling message posted from the control plane.
    fn message(&mut self, message: NodeMessage) {
        let _ = message;
    }

    /// Called on the render thread when the node is torn down.
    fn on_dispose(&mut self) {}
}

/// Render-plane aggregation of one node: ports, parameters, memoization
/// state and the processor behind it.
pub(crate) struct NodeShell {
    pub id: NodeId,
    pub label: &'static str,
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
    pub params: Vec<AudioParam>,
    /// Last block number this node processed; blocks start at 1.
    pub last_block: u64,
    pub ended_fired: bool,
    pub on_ended: Option<Box<dyn FnMut() + Send>>,
    pub alive: Arc<AtomicBool>,
    pub processor: Box<dyn Processor>,
}

impl NodeShell {
    pub(crate) fn new(
        id: NodeId,
        label: &'static str,
        inputs: Vec<InputPort>,
        outputs: Vec<OutputPort>,
        params: Vec<AudioParam>,
        alive: Arc<AtomicBool>,
        processor: Box<dyn Processor>,
    ) -> Self {
        Self {
            id,
            label,
            inputs,
            outputs,
            params,
            last_block: 0,
            ended_fired: false,
            on_ended: None,
            alive,
            processor,
        }
    }
}

/// Everything a processor sees while rendering one block.
pub struct ProcessScope<'a> {
    sample_rate: f64,
    block_time: f64,
    block_number: u64,
    inputs: &'a [InputPort],
    outputs: &'a mut [OutputPort],
    params: &'a [AudioParam],
    ended: bool,
}

impl<'a> ProcessScope<'a> {
    pub(crate) fn new(
        sample_rate: f64,
        block_time: f64,
        block_number: u64,
        inputs: &'a [InputPort],
        outputs: &'a mut [OutputPort],
        params: &'a [AudioParam],
    ) -> Self {
        Self {
            sample_rate,
            block_time,
            block_number,
            inputs,
            outputs,
            params,
            ended: false,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_time(&self) -> f64 {
        self.block_time
    }

    pub fn block_end_time(&self) -> f64 {
        self.block_time + FRAMES_PER_BLOCK as f64 / self.sample_rate
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn frames(&self) -> usize {
        FRAMES_PER_BLOCK
    }

    /// Splits the scope into its input, output and parameter views.
    pub fn parts(&mut self) -> (Inputs<'_>, Outputs<'_>, Params<'_>) {
        (
            Inputs { ports: self.inputs },
            Outputs {
                ports: &mut *self.outputs,
            },
            Params {
                params: self.params,
            },
        )
    }

    /// Marks this block as the node's last: `ended` fires once and the node
    /// disposes itself afterwards.
    pub fn signal_ended(&mut self) {
        self.ended = true;
    }

    pub(crate) fn ended(&self) -> bool {
        self.ended
    }
}

/// Read access to the mixed input blocks.
pub struct Inputs<'a> {
    ports: &'a [InputPort],
}

impl<'a> Inputs<'a> {
    pub(crate) fn new(ports: &'a [InputPort]) -> Self {
        Self { ports }
    }

    pub fn count(&self) -> usize {
        self.ports.len()
    }

    pub fn buffer(&self, index: usize) -> Option<&'a BlockBuffer> {
        self.ports.get(index)?.buffer()
    }

    /// Effective channel count of the pulled block, or the port's nominal
    /// count before the first pull.
    pub fn channels(&self, index: usize) -> usize {
        self.ports
            .get(index)
            .map_or(1, |port| {
                port.buffer()
                    .map_or(port.nominal_channels(), BlockBuffer::channels)
            })
            .max(MIN_CHANNELS)
    }

    pub fn is_silent(&self, index: usize) -> bool {
        self.buffer(index).map_or(true, BlockBuffer::is_silent)
    }
}

/// Write access to the blocks this node publishes.
pub struct Outputs<'a> {
    ports: &'a mut [OutputPort],
}

impl<'a> Outputs<'a> {
    pub fn count(&self) -> usize {
        self.ports.len()
    }

    pub fn buffer_mut(&mut self, index: usize) -> &mut BlockBuffer {
        self.ports[index].buffer_mut()
    }
}

/// Computed parameter values for this block, one slice per parameter.
pub struct Params<'a> {
    params: &'a [AudioParam],
}

impl<'a> Params<'a> {
    pub fn values(&self, index: usize) -> &'a [f32] {
        self.params[index].values()
    }
}

/// Control-plane handle to a node owned by a context. Clones address the
/// same node.
#[derive(Clone)]
pub struct NodeRef {
    context: Arc<Context>,
    id: NodeId,
    label: &'static str,
    input_count: usize,
    output_count: usize,
    alive: Arc<AtomicBool>,
}

impl NodeRef {
    pub(crate) fn new(
        context: Arc<Context>,
        id: NodeId,
        label: &'static str,
        input_count: usize,
        output_count: usize,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            context,
            id,
            label,
            input_count,
            output_count,
            alive,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    /// Routes `output` into `input` of `to`. Validation happens here, on the
    /// calling thread; the topology change lands at the next block boundary.
    pub fn connect(&self, output: usize, to: &NodeRef, input: usize) -> Result<()> {
        self.ensure_alive()?;
        to.ensure_alive()?;
        self.ensure_same_context(to)?;
        if self.id == to.id {
            return Err(EngineError::argument("cannot connect a node to itself"));
        }
        self.ensure_output(output)?;
        to.ensure_input(input)?;
        self.context.execute_or_post(Command::Connect {
            from: self.id,
            output,
            to: to.id,
            input,
        });
        Ok(())
    }

    pub fn disconnect(&self, output: usize, to: &NodeRef, input: usize) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_same_context(to)?;
        self.ensure_output(output)?;
        to.ensure_input(input)?;
        self.context.execute_or_post(Command::Disconnect {
            from: self.id,
            output,
            to: to.id,
            input,
        });
        Ok(())
    }

    /// Routes `output` into the parameter's hidden summing input.
    pub fn connect_to_param(&self, output: usize, param: &ParamRef) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_output(output)?;
        if param.node() == self.id {
            return Err(EngineError::argument(
                "cannot modulate a parameter of the same node",
            ));
        }
        self.context.execute_or_post(Command::ConnectToParam {
            from: self.id,
            output,
            to: param.node(),
            param: param.index(),
        });
        Ok(())
    }

    pub fn disconnect_from_param(&self, output: usize, param: &ParamRef) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_output(output)?;
        self.context.execute_or_post(Command::DisconnectFromParam {
            from: self.id,
            output,
            to: param.node(),
            param: param.index(),
        });
        Ok(())
    }

    /// Reconfigures one input port's channel policy.
    pub fn set_channel_config(
        &self,
        input: usize,
        channels: usize,
        mode: ChannelCountMode,
        interpretation: ChannelInterpretation,
    ) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_input(input)?;
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&channels) {
            return Err(EngineError::argument(format!(
                "channel count {channels} out of range {MIN_CHANNELS}..={MAX_CHANNELS}"
            )));
        }
        self.context.execute_or_post(Command::SetChannelConfig {
            node: self.id,
            input,
            channels,
            mode,
            interpretation,
        });
        Ok(())
    }

    /// Registers the callback invoked (on the render thread) when the node
    /// signals `ended`. Subscribers must not block.
    pub fn set_on_ended(&self, callback: impl FnMut() + Send + 'static) -> Result<()> {
        self.ensure_alive()?;
        self.context.execute_or_post(Command::SetOnEnded {
            node: self.id,
            callback: Box::new(callback),
        });
        Ok(())
    }

    /// Tears the node down at the next block boundary. Idempotent; safe to
    /// call on an already-disposed node or context.
    pub fn dispose(&self) {
        if self.context.is_disposed() {
            return;
        }
        self.context
            .execute_or_post(Command::Dispose { node: self.id });
    }

    pub(crate) fn post_message(&self, message: NodeMessage) -> Result<()> {
        self.ensure_alive()?;
        self.context.execute_or_post(Command::Message {
            node: self.id,
            message,
        });
        Ok(())
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        self.context.ensure_live()?;
        if self.alive.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::Disposed)
        }
    }

    fn ensure_same_context(&self, other: &NodeRef) -> Result<()> {
        if Arc::ptr_eq(&self.context, &other.context) {
            Ok(())
        } else {
            Err(EngineError::argument("nodes belong to different contexts"))
        }
    }

    fn ensure_output(&self, output: usize) -> Result<()> {
        if output < self.output_count {
            Ok(())
        } else {
            Err(EngineError::argument(format!(
                "output index {output} out of range for {} ({} outputs)",
                self.label, self.output_count
            )))
        }
    }

    fn ensure_input(&self, input: usize) -> Result<()> {
        if input < self.input_count {
            Ok(())
        } else {
            Err(EngineError::argument(format!(
                "input index {input} out of range for {} ({} inputs)",
                self.label, self.input_count
            )))
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeRef {}
