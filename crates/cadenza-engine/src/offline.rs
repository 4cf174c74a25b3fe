//! Offline rendering: pull arbitrary frame counts out of the block engine.

use crate::block::{BlockBuffer, FRAMES_PER_BLOCK};
use crate::context::Context;
use crate::error::{EngineError, Result};
use std::sync::Arc;

/// Pulls the destination node block by block and copies the result into
/// caller-provided planar buffers.
///
/// Requests need not be block-aligned: when a call asks for fewer frames
/// than the final block produced, the excess is stashed per channel and
/// returned first by the next call.
pub struct OfflineRenderer {
    context: Arc<Context>,
    carry: CarryOver,
}

impl OfflineRenderer {
    pub fn new(context: Arc<Context>) -> Self {
        Self {
            context,
            carry: CarryOver::new(),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Renders `frames` frames into `output`, starting at index 0.
    pub fn render(&mut self, output: &mut [Vec<f32>], frames: usize) -> Result<()> {
        self.render_at(output, frames, 0)
    }

    /// Renders `frames` frames into `output[channel][start..start + frames]`.
    ///
    /// Arguments are validated before any block is processed: the output
    /// must have at least one channel, the frame count must be positive and
    /// every channel buffer must be large enough.
    pub fn render_at(
        &mut self,
        output: &mut [Vec<f32>],
        frames: usize,
        start: usize,
    ) -> Result<()> {
        self.context.ensure_live()?;
        if output.is_empty() {
            return Err(EngineError::argument("output needs at least one channel"));
        }
        if frames == 0 {
            return Err(EngineError::argument("frame count must be positive"));
        }
        for (index, channel) in output.iter().enumerate() {
            if channel.len() < start + frames {
                return Err(EngineError::argument(format!(
                    "channel {index} holds {} frames, need {}",
                    channel.len(),
                    start + frames
                )));
            }
        }

        let mut written = self.carry.drain_into(output, start, frames);

        while written < frames {
            self.context.process_block()?;
            let take = (frames - written).min(FRAMES_PER_BLOCK);
            let at = start + written;
            let carry = &mut self.carry;
            self.context.with_destination_block(|block| {
                let Some(block) = block else {
                    for destination in output.iter_mut() {
                        destination[at..at + take].fill(0.0);
                    }
                    return;
                };
                for (channel, destination) in output.iter_mut().enumerate() {
                    let target = &mut destination[at..at + take];
                    if channel < block.channels() {
                        target.copy_from_slice(&block.channel(channel)[..take]);
                    } else {
                        target.fill(0.0);
                    }
                }
                if take < FRAMES_PER_BLOCK {
                    carry.stash(block, take);
                }
            });
            written += take;
        }

        Ok(())
    }

    /// Allocating variant: renders into fresh channel buffers.
    pub fn render_alloc(&mut self, channels: usize, frames: usize) -> Result<Vec<Vec<f32>>> {
        if channels == 0 {
            return Err(EngineError::argument("output needs at least one channel"));
        }
        let mut output = vec![vec![0.0; frames]; channels];
        self.render(&mut output, frames)?;
        Ok(output)
    }
}

/// Per-channel stash of frames rendered past the end of a request. Backed by
/// `Vec` growth, so capacity doubles as needed and never shrinks.
struct CarryOver {
    channels: Vec<Vec<f32>>,
    start: usize,
    len: usize,
}

impl CarryOver {
    fn new() -> Self {
        Self {
            channels: Vec::new(),
            start: 0,
            len: 0,
        }
    }

    /// Copies stashed frames to the front of the request; channels the stash
    /// does not cover are zeroed. Returns the frames written.
    fn drain_into(&mut self, output: &mut [Vec<f32>], at: usize, frames: usize) -> usize {
        if self.len == 0 {
            return 0;
        }
        let take = self.len.min(frames);
        for (channel, destination) in output.iter_mut().enumerate() {
            let target = &mut destination[at..at + take];
            match self.channels.get(channel) {
                Some(stash) => target.copy_from_slice(&stash[self.start..self.start + take]),
                None => target.fill(0.0),
            }
        }
        self.start += take;
        self.len -= take;
        take
    }

    /// Keeps every frame of `block` past `consumed` for the next request.
    fn stash(&mut self, block: &BlockBuffer, consumed: usize) {
        if self.channels.len() != block.channels() {
            self.channels.resize_with(block.channels(), Vec::new);
        }
        for (channel, stash) in self.channels.iter_mut().enumerate() {
            stash.clear();
            stash.extend_from_slice(&block.channel(channel)[consumed..]);
        }
        self.start = 0;
        self.len = FRAMES_PER_BLOCK - consumed;
    }
}
