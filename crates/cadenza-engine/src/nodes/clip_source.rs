//! Plays a published [`AudioClip`] through per-channel resamplers.

use crate::clip::AudioClip;
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::node::{Inputs, NodeMessage, NodeRef, ProcessScope, Processor};
use crate::nodes::schedule::SourceTimeline;
use crate::param::{ParamDescriptor, ParamRate, ParamRef};
use cadenza_resample::CubicResampler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const PLAYBACK_RATE: usize = 0;

const PARAMS: &[ParamDescriptor] = &[ParamDescriptor {
    name: "playback_rate",
    default: 1.0,
    min: 0.0,
    max: 32.0,
    rate: ParamRate::Control,
}];

/// Scheduled playback of an immutable clip, resampled from the clip's rate
/// to the context's and scaled by the `playback_rate` parameter. Publishes
/// the clip's channel count.
pub struct ClipSourceNode {
    node: NodeRef,
    playback_rate: ParamRef,
    started: Arc<AtomicBool>,
}

impl ClipSourceNode {
    pub fn new(context: &Arc<Context>, clip: AudioClip) -> Result<Self> {
        Self::build(context, clip, None)
    }

    /// Loops `[loop_start, loop_end)` (seconds of clip time) until stopped.
    pub fn new_looping(
        context: &Arc<Context>,
        clip: AudioClip,
        loop_start: f64,
        loop_end: f64,
    ) -> Result<Self> {
        if !(0.0..loop_end).contains(&loop_start) || loop_end > clip.duration() {
            return Err(EngineError::argument("loop region outside the clip"));
        }
        let start = (loop_start * clip.sample_rate()) as usize;
        let end = ((loop_end * clip.sample_rate()) as usize).min(clip.frames());
        if end.saturating_sub(start) < 4 {
            return Err(EngineError::argument("loop region too short"));
        }
        Self::build(context, clip, Some((start, end)))
    }

    fn build(
        context: &Arc<Context>,
        clip: AudioClip,
        loop_region: Option<(usize, usize)>,
    ) -> Result<Self> {
        if !clip.is_initialized() {
            return Err(EngineError::operation("clip has not been published"));
        }
        let resamplers = vec![CubicResampler::new(); clip.channels()];
        let (node, mut params) = context.register(
            "clip-source",
            Vec::new(),
            1,
            PARAMS,
            Box::new(ClipProcessor {
                clip,
                timeline: SourceTimeline::new(),
                resamplers,
                read_pos: 0,
                pending_offset: 0.0,
                primed: false,
                loop_region,
                exhausted: false,
            }),
        )?;
        let playback_rate = params.remove(PLAYBACK_RATE);
        Ok(Self {
            node,
            playback_rate,
            started: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn playback_rate(&self) -> &ParamRef {
        &self.playback_rate
    }

    /// Begins playback at `when`. A second call is an invalid operation:
    /// clip playback starts once.
    pub fn start(&self, when: f64) -> Result<()> {
        self.start_at(when, 0.0, None)
    }

    /// Starts at `when`, `offset` seconds into the clip, playing at most
    /// `duration` seconds.
    pub fn start_at(&self, when: f64, offset: f64, duration: Option<f64>) -> Result<()> {
        self.node.ensure_alive()?;
        if offset < 0.0 {
            return Err(EngineError::argument("offset must be non-negative"));
        }
        if duration.is_some_and(|d| d <= 0.0) {
            return Err(EngineError::argument("duration must be positive"));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::operation(
                "clip source can only be started once",
            ));
        }
        self.node.post_message(NodeMessage::Start {
            when,
            offset,
            duration,
        })
    }

    pub fn stop(&self, when: f64) -> Result<()> {
        self.node.post_message(NodeMessage::Stop { when })
    }

    pub fn set_on_ended(&self, callback: impl FnMut() + Send + 'static) -> Result<()> {
        self.node.set_on_ended(callback)
    }
}

struct ClipProcessor {
    clip: AudioClip,
    timeline: SourceTimeline,
    resamplers: Vec<CubicResampler>,
    /// Next clip frame to feed into the resamplers.
    read_pos: usize,
    /// Clip offset (seconds) applied when the first window opens.
    pending_offset: f64,
    primed: bool,
    loop_region: Option<(usize, usize)>,
    exhausted: bool,
}

impl Processor for ClipProcessor {
    fn process(&mut self, scope: &mut ProcessScope<'_>) -> Result<()> {
        let sample_rate = scope.sample_rate();
        let plan = self
            .timeline
            .advance(scope.block_time(), scope.block_end_time(), sample_rate);

        let mut content_ended = false;
        if let Some((from, to)) = plan.window {
            let (_, mut outputs, params) = scope.parts();
            if !self.primed {
                self.primed = true;
                self.read_pos = ((self.pending_offset * self.clip.sample_rate()) as usize)
                    .min(self.clip.frames());
            }
            if !self.exhausted && self.clip.is_initialized() {
                let rate = (self.clip.sample_rate() / sample_rate)
                    * params.values(PLAYBACK_RATE)[0].max(0.0) as f64;
                let output = outputs.buffer_mut(0);
                let mut cursor = from;
                while cursor < to {
                    let end_limit = self
                        .loop_region
                        .map_or(self.clip.frames(), |(_, end)| end.min(self.clip.frames()));
                    let available = end_limit.saturating_sub(self.read_pos);

                    let mut consumed = 0;
                    let mut produced = 0;
                    for (channel, resampler) in self.resamplers.iter_mut().enumerate() {
                        let source =
                            &self.clip.channel(channel)[self.read_pos..self.read_pos + available];
                        let target = &mut output.channel_mut(channel)[cursor..to];
                        let (used, filled) = resampler.process(source, target, rate);
                        // All channels share one read position and rate.
                        debug_assert!(channel == 0 || (used, filled) == (consumed, produced));
                        consumed = used;
                        produced = filled;
                    }
                    self.read_pos += consumed;
                    cursor += produced;

                    if cursor >= to {
                        break;
                    }
                    match self.loop_region {
                        Some((start, end)) => self.cross_loop_boundary(start, end),
                        None => {
                            self.exhausted = true;
                            content_ended = true;
                            break;
                        }
                    }
                }
            }
        }

        if plan.ended || (content_ended && self.timeline.finish()) {
            scope.signal_ended();
        }
        Ok(())
    }

    fn output_channels(&self, _output: usize, _inputs: &Inputs<'_>) -> usize {
        self.clip.channels()
    }

    fn message(&mut self, message: NodeMessage) {
        if let NodeMessage::Start {
            when,
            offset,
            duration,
        } = message
        {
            self.timeline.start(when);
            self.pending_offset = offset;
            if let Some(duration) = duration {
                let start = self.timeline.start_time();
                self.timeline.limit(start + duration);
            }
        } else {
            self.timeline.handle(message);
        }
    }
}

impl ClipProcessor {
    /// Splices the resampler state across the loop seam and rewinds the read
    /// position past the two primed samples.
    fn cross_loop_boundary(&mut self, start: usize, end: usize) {
        for (channel, resampler) in self.resamplers.iter_mut().enumerate() {
            let samples = self.clip.channel(channel);
            resampler.setup_loop(
                samples[end - 2],
                samples[end - 1],
                samples[start],
                samples[start + 1],
            );
        }
        self.read_pos = start + 2;
    }
}
