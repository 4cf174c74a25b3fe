//! The node variants shipped with the engine. Each is an independent leaf
//! over the node base: a processor plus a typed control-plane handle.

pub(crate) mod destination;
mod schedule;

mod clip_source;
mod constant;
mod filter;
mod gain;
mod oscillator;
mod panner;

pub use clip_source::ClipSourceNode;
pub use constant::ConstantSourceNode;
pub use filter::{BiquadFilterNode, FilterKind};
pub use gain::GainNode;
pub use oscillator::{OscillatorNode, OscillatorShape};
pub use panner::{DistanceModel, StereoPannerNode};
