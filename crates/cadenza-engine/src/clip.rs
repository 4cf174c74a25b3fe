//! Playable audio data shared between the control plane and source nodes.

use crate::block::{MAX_CHANNELS, MIN_CHANNELS};
use crate::error::{EngineError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct ClipData {
    channels: Vec<Vec<f32>>,
    frames: usize,
    sample_rate: f64,
    /// Set exactly once when the producer publishes; readers observe it
    /// through an acquire load before touching the planar data.
    initialized: AtomicBool,
}

/// Immutable multi-channel audio, safe to read from any thread once
/// published. Cloning is cheap; clones share the same samples.
#[derive(Clone)]
pub struct AudioClip {
    data: Arc<ClipData>,
}

impl AudioClip {
    /// Builds and immediately publishes a clip from planar channel data.
    pub fn from_planar(channels: Vec<Vec<f32>>, sample_rate: f64) -> Result<Self> {
        if sample_rate <= 0.0 {
            return Err(EngineError::argument("sample rate must be positive"));
        }
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&channels.len()) {
            return Err(EngineError::argument(format!(
                "channel count {} out of range {MIN_CHANNELS}..={MAX_CHANNELS}",
                channels.len()
            )));
        }
        let frames = channels[0].len();
        if channels.iter().any(|channel| channel.len() != frames) {
            return Err(EngineError::argument(
                "all channels must have the same frame count",
            ));
        }

        let data = Arc::new(ClipData {
            channels,
            frames,
            sample_rate,
            initialized: AtomicBool::new(false),
        });
        data.initialized.store(true, Ordering::Release);
        Ok(Self { data })
    }

    pub fn channels(&self) -> usize {
        self.data.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.data.frames
    }

    pub fn sample_rate(&self) -> f64 {
        self.data.sample_rate
    }

    pub fn duration(&self) -> f64 {
        self.data.frames as f64 / self.data.sample_rate
    }

    /// Whether the producer has published the sample data.
    pub fn is_initialized(&self) -> bool {
        self.data.initialized.load(Ordering::Acquire)
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.data.channels[index]
    }
}

impl std::fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClip")
            .field("channels", &self.channels())
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate())
            .finish()
    }
}
