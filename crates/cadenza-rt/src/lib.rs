//! Lock-free primitives shared between the Cadenza control and render planes.

pub mod queue;
pub mod ring;

pub use queue::CommandQueue;
pub use ring::{frame_ring, RingConsumer, RingProducer};
