//! Input and output ports: connection lists, channel policies and mixing.

use crate::block::{BlockBuffer, MAX_CHANNELS, MIN_CHANNELS};
use crate::error::Result;
use crate::graph::{GraphArena, RenderContext};
use crate::node::NodeId;
use crate::pool::BufferPool;
use serde::{Deserialize, Serialize};

/// How a port derives its effective channel count from its connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelCountMode {
    /// Maximum over the nominal count and every connected output.
    Max,
    /// Like [`Max`](Self::Max), clamped to the nominal count.
    ClampedMax,
    /// Always the nominal count.
    Explicit,
}

/// How source channels map onto destination channels while mixing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelInterpretation {
    /// Speaker-law up/down-mixing (mono fan-out, equal-power fold-down).
    Speakers,
    /// Channel-wise truncate or zero-pad, no scaling.
    Discrete,
}

/// One upstream endpoint: a node and one of its output ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Connection {
    pub node: NodeId,
    pub output: usize,
}

/// Where an output feeds: a node input port or a parameter's hidden input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputTarget {
    Port { node: NodeId, input: usize },
    Param { node: NodeId, param: usize },
}

impl InputTarget {
    pub(crate) fn node(&self) -> NodeId {
        match self {
            Self::Port { node, .. } | Self::Param { node, .. } => *node,
        }
    }
}

/// Destination side of one or more connections. Owns a block leased from the
/// pool holding the mixed sum of all connected outputs.
pub struct InputPort {
    buffer: Option<BlockBuffer>,
    connections: Vec<Connection>,
    nominal_channels: usize,
    mode: ChannelCountMode,
    interpretation: ChannelInterpretation,
}

impl InputPort {
    pub fn new(
        nominal_channels: usize,
        mode: ChannelCountMode,
        interpretation: ChannelInterpretation,
    ) -> Self {
        Self {
            buffer: None,
            connections: Vec::new(),
            nominal_channels: nominal_channels.clamp(MIN_CHANNELS, MAX_CHANNELS),
            mode,
            interpretation,
        }
    }

    pub(crate) fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub(crate) fn nominal_channels(&self) -> usize {
        self.nominal_channels
    }

    pub(crate) fn connect(&mut self, connection: Connection) {
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
        }
    }

    pub(crate) fn disconnect(&mut self, connection: Connection) {
        self.connections.retain(|existing| *existing != connection);
    }

    pub(crate) fn disconnect_node(&mut self, node: NodeId) {
        self.connections.retain(|existing| existing.node != node);
    }

    pub(crate) fn set_config(
        &mut self,
        nominal_channels: usize,
        mode: ChannelCountMode,
        interpretation: ChannelInterpretation,
    ) {
        self.nominal_channels = nominal_channels.clamp(MIN_CHANNELS, MAX_CHANNELS);
        self.mode = mode;
        self.interpretation = interpretation;
    }

    pub(crate) fn buffer(&self) -> Option<&BlockBuffer> {
        self.buffer.as_ref()
    }

    pub(crate) fn take_buffer(&mut self) -> Option<BlockBuffer> {
        self.buffer.take()
    }

    /// Runs once per block: drives every connected upstream node, then mixes
    /// their published blocks into the leased buffer under the channel laws.
    pub(crate) fn pull(&mut self, graph: &GraphArena, rc: &RenderContext<'_>) -> Result<()> {
        if self.connections.is_empty() {
            match &mut self.buffer {
                Some(buffer) => buffer.clear(),
                None => self.buffer = Some(rc.pool.rent(self.nominal_channels)),
            }
            return Ok(());
        }

        for connection in &self.connections {
            graph.ensure_processed(connection.node, rc)?;
        }

        let effective = self.effective_channels(graph);
        let needs_lease = self
            .buffer
            .as_ref()
            .map_or(true, |buffer| buffer.channels() != effective);
        if needs_lease {
            if let Some(stale) = self.buffer.take() {
                rc.pool.recycle(stale);
            }
            self.buffer = Some(rc.pool.rent(effective));
        }

        let buffer = self.buffer.as_mut().expect("input buffer leased above");
        buffer.clear();
        for connection in &self.connections {
            graph.with_output(connection.node, connection.output, |source| {
                mix_into(buffer, source, self.interpretation);
            });
        }
        Ok(())
    }

    fn effective_channels(&self, graph: &GraphArena) -> usize {
        let effective = match self.mode {
            ChannelCountMode::Explicit => self.nominal_channels,
            ChannelCountMode::Max | ChannelCountMode::ClampedMax => {
                let mut max = self.nominal_channels;
                for connection in &self.connections {
                    if let Some(channels) =
                        graph.output_channel_count(connection.node, connection.output)
                    {
                        max = max.max(channels);
                    }
                }
                if self.mode == ChannelCountMode::ClampedMax {
                    max.min(self.nominal_channels)
                } else {
                    max
                }
            }
        };
        effective.clamp(MIN_CHANNELS, MAX_CHANNELS)
    }
}

/// Source side of a connection: holds the block published by the owning
/// node's last process call and the list of downstream consumers.
pub struct OutputPort {
    buffer: Option<BlockBuffer>,
    consumers: Vec<InputTarget>,
}

impl OutputPort {
    pub(crate) fn new() -> Self {
        Self {
            buffer: None,
            consumers: Vec::new(),
        }
    }

    pub(crate) fn buffer(&self) -> Option<&BlockBuffer> {
        self.buffer.as_ref()
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut BlockBuffer {
        self.buffer.as_mut().expect("output buffer leased")
    }

    pub(crate) fn take_buffer(&mut self) -> Option<BlockBuffer> {
        self.buffer.take()
    }

    /// Leases (or re-leases on channel-count change) and clears the block
    /// this output will publish.
    pub(crate) fn prepare(&mut self, channels: usize, pool: &BufferPool) {
        let needs_lease = self
            .buffer
            .as_ref()
            .map_or(true, |buffer| buffer.channels() != channels);
        if needs_lease {
            if let Some(stale) = self.buffer.take() {
                pool.recycle(stale);
            }
            self.buffer = Some(pool.rent(channels));
        } else if let Some(buffer) = &mut self.buffer {
            buffer.clear();
        }
    }

    pub(crate) fn add_consumer(&mut self, target: InputTarget) {
        if !self.consumers.contains(&target) {
            self.consumers.push(target);
        }
    }

    pub(crate) fn remove_consumer(&mut self, target: InputTarget) {
        self.consumers.retain(|existing| *existing != target);
    }

    pub(crate) fn remove_consumers_of(&mut self, node: NodeId) {
        self.consumers.retain(|existing| existing.node() != node);
    }
}

/// Adds `source` into `destination` under the channel-conversion law.
/// Silent sources contribute nothing and leave the destination flag alone.
pub(crate) fn mix_into(
    destination: &mut BlockBuffer,
    source: &BlockBuffer,
    interpretation: ChannelInterpretation,
) {
    if source.is_silent() {
        return;
    }
    let src_channels = source.channels();
    let dst_channels = destination.channels();

    match interpretation {
        ChannelInterpretation::Speakers if src_channels == 1 && dst_channels > 1 => {
            for channel in 0..dst_channels {
                let out = destination.channel_mut(channel);
                for (sample, &add) in out.iter_mut().zip(source.channel(0)) {
                    *sample += add;
                }
            }
        }
        ChannelInterpretation::Speakers if src_channels > 1 && dst_channels == 1 => {
            let scale = 1.0 / (src_channels as f32).sqrt();
            let out = destination.channel_mut(0);
            for channel in 0..src_channels {
                for (sample, &add) in out.iter_mut().zip(source.channel(channel)) {
                    *sample += add * scale;
                }
            }
        }
        _ => {
            for channel in 0..src_channels.min(dst_channels) {
                let out = destination.channel_mut(channel);
                for (sample, &add) in out.iter_mut().zip(source.channel(channel)) {
                    *sample += add;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FRAMES_PER_BLOCK;

    fn constant_block(channels: usize, values: &[f32]) -> BlockBuffer {
        let mut block = BlockBuffer::new(channels);
        for (channel, &value) in values.iter().enumerate() {
            block.channel_mut(channel).fill(value);
        }
        block
    }

    #[test]
    fn equal_counts_add_channel_wise() {
        let source = constant_block(2, &[0.25, -0.5]);
        let mut destination = constant_block(2, &[0.1, 0.1]);
        mix_into(&mut destination, &source, ChannelInterpretation::Speakers);
        assert!((destination.channel(0)[0] - 0.35).abs() < 1e-6);
        assert!((destination.channel(1)[0] + 0.4).abs() < 1e-6);
    }

    #[test]
    fn mono_fans_out_to_every_destination_channel() {
        let source = constant_block(1, &[0.5]);
        let mut destination = BlockBuffer::new(3);
        destination.clear();
        mix_into(&mut destination, &source, ChannelInterpretation::Speakers);
        for channel in 0..3 {
            assert_eq!(destination.channel(channel)[FRAMES_PER_BLOCK - 1], 0.5);
        }
    }

    #[test]
    fn downmix_to_mono_is_equal_power() {
        let source = constant_block(2, &[1.0, 1.0]);
        let mut destination = BlockBuffer::new(1);
        destination.clear();
        mix_into(&mut destination, &source, ChannelInterpretation::Speakers);
        let expected = 2.0 / (2.0_f32).sqrt();
        assert!((destination.channel(0)[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn surplus_source_channels_are_dropped() {
        let source = constant_block(4, &[1.0, 2.0, 3.0, 4.0]);
        let mut destination = BlockBuffer::new(2);
        destination.clear();
        mix_into(&mut destination, &source, ChannelInterpretation::Discrete);
        assert_eq!(destination.channel(0)[0], 1.0);
        assert_eq!(destination.channel(1)[0], 2.0);
    }

    #[test]
    fn discrete_downmix_does_not_scale() {
        let source = constant_block(2, &[1.0, 1.0]);
        let mut destination = BlockBuffer::new(1);
        destination.clear();
        mix_into(&mut destination, &source, ChannelInterpretation::Discrete);
        assert_eq!(destination.channel(0)[0], 1.0);
    }

    #[test]
    fn silent_sources_leave_the_flag_untouched() {
        let source = BlockBuffer::new(2);
        let mut destination = BlockBuffer::new(2);
        destination.clear();
        mix_into(&mut destination, &source, ChannelInterpretation::Speakers);
        assert!(destination.is_silent());
    }

    #[test]
    fn non_silent_source_marks_the_destination() {
        // Left and right cancel to zero but the destination still reports
        // possible signal.
        let source = constant_block(2, &[1.0, -1.0]);
        let mut destination = BlockBuffer::new(1);
        destination.clear();
        mix_into(&mut destination, &source, ChannelInterpretation::Speakers);
        assert!(!destination.is_silent());
        assert!(destination.channel(0)[0].abs() < 1e-6);
    }
}
