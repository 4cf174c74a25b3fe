//! Shared start/stop timing for scheduled source nodes.

use crate::block::FRAMES_PER_BLOCK;
use crate::node::NodeMessage;

/// Frame-boundary tolerance: times that round-trip through seconds land
/// within an ulp of the boundary, this keeps them on it.
const EDGE_EPSILON: f64 = 1e-9;

/// What a source does with the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockPlan {
    /// Frame range to render, if any; frames outside stay zero.
    pub window: Option<(usize, usize)>,
    /// The block whose end reached the stop time; `ended` fires now.
    pub ended: bool,
}

impl BlockPlan {
    fn silent() -> Self {
        Self {
            window: None,
            ended: false,
        }
    }
}

/// Start/stop state of one source. Times are absolute seconds; NaN means
/// unset.
#[derive(Debug)]
pub(crate) struct SourceTimeline {
    start_time: f64,
    stop_time: f64,
    started: bool,
    ended: bool,
}

impl SourceTimeline {
    pub(crate) fn new() -> Self {
        Self {
            start_time: f64::NAN,
            stop_time: f64::NAN,
            started: false,
            ended: false,
        }
    }

    /// Applies a scheduling message. Repeated starts are ignored here; the
    /// per-node start policy is enforced control-side.
    pub(crate) fn handle(&mut self, message: NodeMessage) {
        match message {
            NodeMessage::Start { when, .. } => self.start(when),
            NodeMessage::Stop { when } => self.stop(when),
        }
    }

    pub(crate) fn start(&mut self, when: f64) {
        if !self.started {
            self.started = true;
            // Non-positive times mean "immediately".
            self.start_time = when.max(0.0);
        }
    }

    pub(crate) fn stop(&mut self, when: f64) {
        if self.started && !self.ended {
            self.stop_time = when.max(0.0).max(self.start_time);
        }
    }

    /// Caps playback at `until`, keeping any earlier stop.
    pub(crate) fn limit(&mut self, until: f64) {
        if self.stop_time.is_nan() || until < self.stop_time {
            self.stop_time = until.max(self.start_time);
        }
    }

    pub(crate) fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Ends playback now regardless of the stop time (content ran out).
    pub(crate) fn finish(&mut self) -> bool {
        if self.ended {
            false
        } else {
            self.ended = true;
            true
        }
    }

    /// Computes the play window for the block `[t0, t1)` and latches `ended`
    /// on the first block whose end reaches the stop time.
    pub(crate) fn advance(&mut self, t0: f64, t1: f64, sample_rate: f64) -> BlockPlan {
        if self.ended || !self.started {
            return BlockPlan::silent();
        }

        let mut plan = BlockPlan::silent();
        let plays = t1 > self.start_time && (self.stop_time.is_nan() || t0 < self.stop_time);
        if plays {
            let from = if self.start_time > t0 {
                ((self.start_time - t0) * sample_rate - EDGE_EPSILON).ceil() as usize
            } else {
                0
            };
            let to = if !self.stop_time.is_nan() && self.stop_time < t1 {
                ((self.stop_time - t0) * sample_rate + EDGE_EPSILON).floor() as usize
            } else {
                FRAMES_PER_BLOCK
            };
            let from = from.min(FRAMES_PER_BLOCK);
            let to = to.min(FRAMES_PER_BLOCK);
            if from < to {
                plan.window = Some((from, to));
            }
        }

        if !self.stop_time.is_nan() && t1 >= self.stop_time {
            self.ended = true;
            plan.ended = true;
        }
        plan
    }
}
