//! Fixed-size multi-channel sample blocks, the unit of data flow.

/// Frames rendered per block. Every buffer in the graph carries exactly this
/// many frames per channel.
pub const FRAMES_PER_BLOCK: usize = 128;

pub const MIN_CHANNELS: usize = 1;
pub const MAX_CHANNELS: usize = 32;

/// Non-interleaved block of audio, 128 frames per channel.
///
/// The `silent` flag is advisory: `true` guarantees all samples are zero,
/// `false` only means the block may contain signal. Obtaining a mutable
/// channel clears the flag; only [`clear`](Self::clear) sets it again.
#[derive(Debug, Clone)]
pub struct BlockBuffer {
    samples: Vec<f32>,
    channels: usize,
    silent: bool,
}

impl BlockBuffer {
    pub(crate) fn new(channels: usize) -> Self {
        let channels = channels.clamp(MIN_CHANNELS, MAX_CHANNELS);
        Self {
            samples: vec![0.0; channels * FRAMES_PER_BLOCK],
            channels,
            silent: true,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        FRAMES_PER_BLOCK
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        let start = index * FRAMES_PER_BLOCK;
        &self.samples[start..start + FRAMES_PER_BLOCK]
    }

    /// Mutable access to one channel. Marks the block as possibly carrying
    /// signal, even if the caller only writes zeros.
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        self.silent = false;
        let start = index * FRAMES_PER_BLOCK;
        &mut self.samples[start..start + FRAMES_PER_BLOCK]
    }

    /// Zeroes every sample and restores the silent flag.
    pub fn clear(&mut self) {
        self.samples.fill(0.0);
        self.silent = true;
    }

    /// Copies another block of the same channel count, silent flag included.
    pub(crate) fn copy_from(&mut self, other: &BlockBuffer) {
        debug_assert_eq!(self.channels, other.channels);
        self.samples.copy_from_slice(&other.samples);
        self.silent = other.silent;
    }
}
