//! Sample-accurate parameter automation.
//!
//! The control plane schedules events against an immutable, sorted event
//! list republished through an atomic swap, so the render thread reads one
//! snapshot per block without locking. Audio-rate modulation arrives through
//! a hidden mono summing input and is added after the automation value, with
//! clamping applied to the sum.

use crate::block::FRAMES_PER_BLOCK;
use crate::error::{EngineError, Result};
use crate::graph::{GraphArena, RenderContext};
use crate::node::NodeId;
use crate::port::{ChannelCountMode, ChannelInterpretation, InputPort};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Whether a parameter produces one value per sample or one per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamRate {
    Audio,
    Control,
}

/// Static description of a parameter: bounds, default and rate.
#[derive(Debug, Clone, Copy)]
pub struct ParamDescriptor {
    pub name: &'static str,
    pub default: f32,
    pub min: f32,
    pub max: f32,
    pub rate: ParamRate,
}

/// One scheduled automation event. Events are kept sorted by time; equal
/// times preserve scheduling order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamEvent {
    SetValue { value: f32, time: f64 },
    LinearRamp { value: f32, time: f64 },
    ExponentialRamp { value: f32, time: f64 },
    SetTarget { target: f32, time: f64, time_constant: f64 },
}

impl ParamEvent {
    pub fn time(&self) -> f64 {
        match self {
            Self::SetValue { time, .. }
            | Self::LinearRamp { time, .. }
            | Self::ExponentialRamp { time, .. }
            | Self::SetTarget { time, .. } => *time,
        }
    }

    /// The event's value endpoint; for `SetTarget` this is the target.
    pub fn value(&self) -> f32 {
        match self {
            Self::SetValue { value, .. }
            | Self::LinearRamp { value, .. }
            | Self::ExponentialRamp { value, .. } => *value,
            Self::SetTarget { target, .. } => *target,
        }
    }
}

pub(crate) struct ParamState {
    descriptor: ParamDescriptor,
    /// Baseline scalar as f32 bits; writing it cancels the schedule.
    intrinsic: AtomicU32,
    events: ArcSwap<Vec<ParamEvent>>,
}

/// Control-plane handle to one parameter of one node.
#[derive(Clone)]
pub struct ParamRef {
    state: Arc<ParamState>,
    node: NodeId,
    index: usize,
    alive: Arc<AtomicBool>,
}

impl ParamRef {
    pub fn name(&self) -> &'static str {
        self.state.descriptor.name
    }

    pub fn min(&self) -> f32 {
        self.state.descriptor.min
    }

    pub fn max(&self) -> f32 {
        self.state.descriptor.max
    }

    pub fn default_value(&self) -> f32 {
        self.state.descriptor.default
    }

    pub fn rate(&self) -> ParamRate {
        self.state.descriptor.rate
    }

    /// The intrinsic scalar, ignoring any scheduled events.
    pub fn value(&self) -> f32 {
        f32::from_bits(self.state.intrinsic.load(Ordering::Acquire))
    }

    /// Sets the intrinsic scalar and cancels every scheduled event.
    pub fn set_value(&self, value: f32) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_finite(value)?;
        let clamped = value.clamp(self.min(), self.max());
        self.state
            .intrinsic
            .store(clamped.to_bits(), Ordering::Release);
        self.state.events.store(Arc::new(Vec::new()));
        Ok(())
    }

    pub fn set_value_at_time(&self, value: f32, time: f64) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_finite(value)?;
        self.ensure_time(time)?;
        self.schedule(ParamEvent::SetValue { value, time });
        Ok(())
    }

    pub fn linear_ramp_to_value_at_time(&self, value: f32, time: f64) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_finite(value)?;
        self.ensure_time(time)?;
        self.schedule(ParamEvent::LinearRamp { value, time });
        Ok(())
    }

    /// The ramp target must be strictly positive; geometric interpolation is
    /// undefined through zero.
    pub fn exponential_ramp_to_value_at_time(&self, value: f32, time: f64) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_finite(value)?;
        self.ensure_time(time)?;
        if value <= 0.0 {
            return Err(EngineError::argument(
                "exponential ramp target must be strictly positive",
            ));
        }
        self.schedule(ParamEvent::ExponentialRamp { value, time });
        Ok(())
    }

    pub fn set_target_at_time(&self, target: f32, time: f64, time_constant: f64) -> Result<()> {
        self.ensure_alive()?;
        self.ensure_finite(target)?;
        self.ensure_time(time)?;
        if !time_constant.is_finite() || time_constant < 0.0 {
            return Err(EngineError::argument("time constant must be non-negative"));
        }
        self.schedule(ParamEvent::SetTarget {
            target,
            time,
            time_constant,
        });
        Ok(())
    }

    /// Drops every event scheduled at or after `time`.
    pub fn cancel_scheduled_values(&self, time: f64) -> Result<()> {
        self.ensure_alive()?;
        self.state.events.rcu(|events| {
            let keep = events.partition_point(|event| event.time() < time);
            events[..keep].to_vec()
        });
        Ok(())
    }

    pub(crate) fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    fn schedule(&self, event: ParamEvent) {
        self.state.events.rcu(|events| {
            let mut next = (**events).clone();
            let at = next.partition_point(|existing| existing.time() <= event.time());
            next.insert(at, event);
            next
        });
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::Disposed)
        }
    }

    fn ensure_finite(&self, value: f32) -> Result<()> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(EngineError::argument("parameter value must be finite"))
        }
    }

    fn ensure_time(&self, time: f64) -> Result<()> {
        if time.is_finite() {
            Ok(())
        } else {
            Err(EngineError::argument("event time must be finite"))
        }
    }
}

/// Render-plane half of a parameter: the shared state, the hidden summing
/// input and the per-block computed values.
pub(crate) struct AudioParam {
    state: Arc<ParamState>,
    input: InputPort,
    values: Vec<f32>,
}

impl AudioParam {
    pub(crate) fn create(
        descriptor: ParamDescriptor,
        node: NodeId,
        index: usize,
        alive: &Arc<AtomicBool>,
    ) -> (AudioParam, ParamRef) {
        let state = Arc::new(ParamState {
            intrinsic: AtomicU32::new(descriptor.default.to_bits()),
            events: ArcSwap::from_pointee(Vec::new()),
            descriptor,
        });
        let param = AudioParam {
            state: Arc::clone(&state),
            input: InputPort::new(
                1,
                ChannelCountMode::Explicit,
                ChannelInterpretation::Speakers,
            ),
            values: vec![descriptor.default; FRAMES_PER_BLOCK],
        };
        let handle = ParamRef {
            state,
            node,
            index,
            alive: Arc::clone(alive),
        };
        (param, handle)
    }

    pub(crate) fn values(&self) -> &[f32] {
        &self.values
    }

    pub(crate) fn input_mut(&mut self) -> &mut InputPort {
        &mut self.input
    }

    /// Pulls the modulation input (if connected) and fills the computed
    /// values for this block.
    pub(crate) fn process(&mut self, graph: &GraphArena, rc: &RenderContext<'_>) -> Result<()> {
        let modulated = !self.input.connections().is_empty();
        if modulated {
            self.input.pull(graph, rc)?;
        }

        let descriptor = self.state.descriptor;
        let intrinsic = f32::from_bits(self.state.intrinsic.load(Ordering::Acquire));
        let events = self.state.events.load();
        let modulation = if modulated { self.input.buffer() } else { None };

        match descriptor.rate {
            ParamRate::Control => {
                let base = value_at(events.as_slice(), intrinsic, rc.block_time);
                // Control-rate modulation samples the first frame of the block.
                let offset = modulation.map_or(0.0, |block| block.channel(0)[0]);
                let value = (base + offset).clamp(descriptor.min, descriptor.max);
                self.values.fill(value);
            }
            ParamRate::Audio => {
                let dt = 1.0 / rc.sample_rate;
                for frame in 0..FRAMES_PER_BLOCK {
                    let t = rc.block_time + frame as f64 * dt;
                    let base = value_at(events.as_slice(), intrinsic, t);
                    let offset = modulation.map_or(0.0, |block| block.channel(0)[frame]);
                    self.values[frame] = (base + offset).clamp(descriptor.min, descriptor.max);
                }
            }
        }
        Ok(())
    }
}

/// Evaluates the automation value at absolute time `t`.
///
/// Scans the sorted event list tracking a baseline that advances across
/// set-value and ramp events; set-target events leave the baseline in place
/// and instead remember where their approach started from.
fn value_at(events: &[ParamEvent], intrinsic: f32, t: f64) -> f32 {
    let mut baseline = intrinsic;
    let mut approach_from = intrinsic;
    let mut previous: Option<&ParamEvent> = None;

    for event in events {
        if t < event.time() {
            return match previous {
                None => baseline,
                Some(before) => segment_value(before, event, approach_from, t),
            };
        }
        match event {
            ParamEvent::SetTarget { .. } => approach_from = baseline,
            _ => baseline = event.value(),
        }
        previous = Some(event);
    }

    match previous {
        None => baseline,
        Some(ParamEvent::SetTarget {
            target,
            time,
            time_constant,
        }) => approach(*target, approach_from, t - time, *time_constant),
        Some(before) => before.value(),
    }
}

/// Value between two consecutive events, `before.time() <= t < after.time()`.
fn segment_value(before: &ParamEvent, after: &ParamEvent, approach_from: f32, t: f64) -> f32 {
    match after {
        ParamEvent::LinearRamp { value, time } => {
            interpolate_linear(before.value(), before.time(), *value, *time, t)
        }
        ParamEvent::ExponentialRamp { value, time } => {
            interpolate_exponential(before.value(), before.time(), *value, *time, t)
        }
        _ => match before {
            ParamEvent::SetTarget {
                target,
                time,
                time_constant,
            } => approach(*target, approach_from, t - time, *time_constant),
            _ => before.value(),
        },
    }
}

fn interpolate_linear(v0: f32, t0: f64, v1: f32, t1: f64, t: f64) -> f32 {
    if t1 <= t0 {
        return v1;
    }
    let u = (t - t0) / (t1 - t0);
    (v0 as f64 + (v1 as f64 - v0 as f64) * u) as f32
}

/// Geometric interpolation; degrades to linear when either endpoint is not
/// strictly positive.
fn interpolate_exponential(v0: f32, t0: f64, v1: f32, t1: f64, t: f64) -> f32 {
    if v0 <= 0.0 || v1 <= 0.0 {
        return interpolate_linear(v0, t0, v1, t1, t);
    }
    if t1 <= t0 {
        return v1;
    }
    let u = (t - t0) / (t1 - t0);
    (v0 as f64 * (v1 as f64 / v0 as f64).powf(u)) as f32
}

/// Exponential approach toward `target` starting from `from`, `elapsed`
/// seconds after the event time. The time constant is floored at 1 ms.
fn approach(target: f32, from: f32, elapsed: f64, time_constant: f64) -> f32 {
    let tau = time_constant.max(1e-3);
    (target as f64 + (from as f64 - target as f64) * (-elapsed / tau).exp()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(list: &[ParamEvent]) -> Vec<ParamEvent> {
        list.to_vec()
    }

    #[test]
    fn intrinsic_applies_before_the_first_event() {
        let list = events(&[ParamEvent::SetValue {
            value: 2.0,
            time: 1.0,
        }]);
        assert_eq!(value_at(&list, 0.5, 0.0), 0.5);
        assert_eq!(value_at(&list, 0.5, 0.999), 0.5);
        assert_eq!(value_at(&list, 0.5, 1.0), 2.0);
        assert_eq!(value_at(&list, 0.5, 5.0), 2.0);
    }

    #[test]
    fn linear_ramp_interpolates_between_events() {
        let list = events(&[
            ParamEvent::SetValue {
                value: 0.0,
                time: 0.0,
            },
            ParamEvent::LinearRamp {
                value: 1.0,
                time: 1.0,
            },
        ]);
        assert_eq!(value_at(&list, 9.0, 0.0), 0.0);
        assert!((value_at(&list, 9.0, 0.25) - 0.25).abs() < 1e-6);
        assert!((value_at(&list, 9.0, 0.75) - 0.75).abs() < 1e-6);
        assert_eq!(value_at(&list, 9.0, 1.0), 1.0);
    }

    #[test]
    fn exponential_ramp_is_geometric() {
        let list = events(&[
            ParamEvent::SetValue {
                value: 1.0,
                time: 0.0,
            },
            ParamEvent::ExponentialRamp {
                value: 100.0,
                time: 1.0,
            },
        ]);
        assert!((value_at(&list, 0.0, 0.5) - 10.0).abs() < 1e-4);
    }

    #[test]
    fn exponential_ramp_degrades_to_linear_through_zero() {
        let list = events(&[
            ParamEvent::SetValue {
                value: 0.0,
                time: 0.0,
            },
            ParamEvent::ExponentialRamp {
                value: 1.0,
                time: 1.0,
            },
        ]);
        assert!((value_at(&list, 0.0, 0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn set_target_approaches_exponentially() {
        let list = events(&[
            ParamEvent::SetValue {
                value: 1.0,
                time: 0.0,
            },
            ParamEvent::SetTarget {
                target: 0.0,
                time: 0.0,
                time_constant: 0.5,
            },
        ]);
        let at_tau = value_at(&list, 0.0, 0.5);
        assert!((at_tau - (-1.0f64).exp() as f32).abs() < 1e-6);
        // Approach is monotone toward the target.
        assert!(value_at(&list, 0.0, 0.25) > at_tau);
        assert!(value_at(&list, 0.0, 1.5) < at_tau);
    }

    #[test]
    fn set_target_does_not_advance_the_baseline() {
        // A set-value after the target interrupts the approach.
        let list = events(&[
            ParamEvent::SetValue {
                value: 1.0,
                time: 0.0,
            },
            ParamEvent::SetTarget {
                target: 0.0,
                time: 0.0,
                time_constant: 10.0,
            },
            ParamEvent::SetValue {
                value: 0.75,
                time: 1.0,
            },
        ]);
        assert_eq!(value_at(&list, 0.0, 2.0), 0.75);
    }

    #[test]
    fn tiny_time_constants_are_floored() {
        let list = events(&[ParamEvent::SetTarget {
            target: 1.0,
            time: 0.0,
            time_constant: 0.0,
        }]);
        // With the 1 ms floor the value is still finite and approaching.
        let value = value_at(&list, 0.0, 0.0005);
        assert!(value > 0.0 && value < 1.0);
    }

    #[test]
    fn schedule_keeps_events_sorted() {
        let alive = Arc::new(AtomicBool::new(true));
        let (param, handle) = AudioParam::create(
            ParamDescriptor {
                name: "test",
                default: 0.0,
                min: -10.0,
                max: 10.0,
                rate: ParamRate::Audio,
            },
            NodeId::next(),
            0,
            &alive,
        );
        handle.set_value_at_time(3.0, 3.0).unwrap();
        handle.set_value_at_time(1.0, 1.0).unwrap();
        handle.set_value_at_time(2.0, 2.0).unwrap();
        let snapshot = param.state.events.load();
        let times: Vec<f64> = snapshot.iter().map(|event| event.time()).collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn set_value_cancels_the_schedule() {
        let alive = Arc::new(AtomicBool::new(true));
        let (param, handle) = AudioParam::create(
            ParamDescriptor {
                name: "test",
                default: 0.0,
                min: -10.0,
                max: 10.0,
                rate: ParamRate::Audio,
            },
            NodeId::next(),
            0,
            &alive,
        );
        handle.set_value_at_time(5.0, 1.0).unwrap();
        handle.set_value(0.25).unwrap();
        assert!(param.state.events.load().is_empty());
        assert_eq!(handle.value(), 0.25);
    }

    #[test]
    fn cancel_drops_the_suffix() {
        let alive = Arc::new(AtomicBool::new(true));
        let (param, handle) = AudioParam::create(
            ParamDescriptor {
                name: "test",
                default: 0.0,
                min: -10.0,
                max: 10.0,
                rate: ParamRate::Audio,
            },
            NodeId::next(),
            0,
            &alive,
        );
        handle.set_value_at_time(1.0, 1.0).unwrap();
        handle.set_value_at_time(2.0, 2.0).unwrap();
        handle.set_value_at_time(3.0, 3.0).unwrap();
        handle.cancel_scheduled_values(2.0).unwrap();
        let snapshot = param.state.events.load();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].time(), 1.0);
    }

    #[test]
    fn exponential_ramp_rejects_non_positive_targets() {
        let alive = Arc::new(AtomicBool::new(true));
        let (_, handle) = AudioParam::create(
            ParamDescriptor {
                name: "test",
                default: 1.0,
                min: 0.0,
                max: 10.0,
                rate: ParamRate::Audio,
            },
            NodeId::next(),
            0,
            &alive,
        );
        assert!(matches!(
            handle.exponential_ramp_to_value_at_time(0.0, 1.0),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(handle.exponential_ramp_to_value_at_time(0.5, 1.0).is_ok());
    }

    #[test]
    fn dead_handles_report_disposed() {
        let alive = Arc::new(AtomicBool::new(true));
        let (_, handle) = AudioParam::create(
            ParamDescriptor {
                name: "test",
                default: 0.0,
                min: 0.0,
                max: 1.0,
                rate: ParamRate::Control,
            },
            NodeId::next(),
            0,
            &alive,
        );
        alive.store(false, Ordering::Release);
        assert!(matches!(handle.set_value(0.5), Err(EngineError::Disposed)));
    }
}
