//! Cadenza Engine
//! ==============
//! A pull-based, block-synchronous audio graph: sinks demand fixed 128-frame
//! blocks, nodes process at most once per block, parameters automate with
//! sample accuracy, and a lock-free command queue keeps the control plane
//! off the render thread. Offline rendering and a cpal-backed realtime
//! driver share the same core.

pub mod block;
pub mod clip;
mod command;
pub mod context;
pub mod error;
mod graph;
pub mod node;
pub mod nodes;
pub mod offline;
pub mod param;
pub mod pool;
pub mod port;
pub mod realtime;

pub use block::{BlockBuffer, FRAMES_PER_BLOCK, MAX_CHANNELS, MIN_CHANNELS};
pub use clip::AudioClip;
pub use context::{Context, DEFAULT_SAMPLE_RATE};
pub use error::{EngineError, Result};
pub use node::{Inputs, NodeId, NodeMessage, NodeRef, Outputs, Params, ProcessScope, Processor};
pub use nodes::{
    BiquadFilterNode, ClipSourceNode, ConstantSourceNode, DistanceModel, FilterKind, GainNode,
    OscillatorNode, OscillatorShape, StereoPannerNode,
};
pub use offline::OfflineRenderer;
pub use param::{ParamDescriptor, ParamEvent, ParamRate, ParamRef};
pub use pool::{BufferPool, PoolStats};
pub use port::{ChannelCountMode, ChannelInterpretation, InputPort};
pub use realtime::{output_devices, DeviceInfo, RealtimeOutput, StreamOptions};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Emits 1.0 on one channel and counts how often it runs.
    struct CountingSource {
        invocations: Arc<AtomicUsize>,
    }

    impl Processor for CountingSource {
        fn process(&mut self, scope: &mut ProcessScope<'_>) -> Result<()> {
            self.invocations.fetch_add(1, Ordering::Relaxed);
            let (_, mut outputs, _) = scope.parts();
            outputs.buffer_mut(0).channel_mut(0).fill(1.0);
            Ok(())
        }

        fn output_channels(&self, _output: usize, _inputs: &Inputs<'_>) -> usize {
            1
        }
    }

    fn counting_source(context: &Arc<Context>) -> (NodeRef, Arc<AtomicUsize>) {
        let invocations = Arc::new(AtomicUsize::new(0));
        let (node, _) = context
            .register(
                "counting-source",
                Vec::new(),
                1,
                &[],
                Box::new(CountingSource {
                    invocations: Arc::clone(&invocations),
                }),
            )
            .expect("register");
        (node, invocations)
    }

    fn render_once(context: &Arc<Context>) {
        let mut renderer = OfflineRenderer::new(Arc::clone(context));
        let mut output = vec![vec![0.0; FRAMES_PER_BLOCK]; 2];
        renderer.render(&mut output, FRAMES_PER_BLOCK).expect("render");
    }

    #[test]
    fn fan_out_processes_a_node_once_per_block() {
        let context = Context::new(48_000.0).expect("context");
        let (source, invocations) = counting_source(&context);
        let through_a = GainNode::new(&context).expect("gain a");
        let through_b = GainNode::new(&context).expect("gain b");
        let destination = context.destination();

        source.connect(0, through_a.node(), 0).unwrap();
        source.connect(0, through_b.node(), 0).unwrap();
        through_a.node().connect(0, &destination, 0).unwrap();
        through_b.node().connect(0, &destination, 0).unwrap();

        render_once(&context);
        assert_eq!(invocations.load(Ordering::Relaxed), 1);

        render_once(&context);
        assert_eq!(invocations.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn chains_pull_each_ancestor_exactly_once() {
        let context = Context::new(48_000.0).expect("context");
        let (source, invocations) = counting_source(&context);
        let middle = GainNode::new(&context).expect("middle");
        let last = GainNode::new(&context).expect("last");
        let destination = context.destination();

        source.connect(0, middle.node(), 0).unwrap();
        middle.node().connect(0, last.node(), 0).unwrap();
        last.node().connect(0, &destination, 0).unwrap();

        render_once(&context);
        assert_eq!(invocations.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn parameter_modulation_sums_after_the_schedule() {
        let context = Context::new(48_000.0).expect("context");
        let (source, _) = counting_source(&context);
        let gain = GainNode::new(&context).expect("gain");
        let destination = context.destination();

        source.connect(0, gain.node(), 0).unwrap();
        gain.node().connect(0, &destination, 0).unwrap();
        gain.gain().set_value(0.25).unwrap();

        let modulator = ConstantSourceNode::new(&context).expect("modulator");
        modulator.offset().set_value(0.5).unwrap();
        modulator.node().connect_to_param(0, gain.gain()).unwrap();
        modulator.start(0.0).unwrap();

        let mut renderer = OfflineRenderer::new(Arc::clone(&context));
        let mut output = vec![vec![0.0; FRAMES_PER_BLOCK]; 2];
        renderer.render(&mut output, FRAMES_PER_BLOCK).unwrap();

        // Source is 1.0 everywhere; effective gain is 0.25 + 0.5.
        for &sample in &output[0] {
            assert!((sample - 0.75).abs() < 1e-6);
        }
    }

    #[test]
    fn commands_execute_inline_between_blocks_on_the_render_thread() {
        let context = Context::new(48_000.0).expect("context");
        render_once(&context);

        // This thread is now the render thread and no block is in flight,
        // so registration lands in the arena without a drain.
        let before = context.node_count();
        let (node, _) = counting_source(&context);
        assert_eq!(context.node_count(), before + 1);
        assert!(context.has_node(node.id()));
    }

    #[test]
    fn self_connection_is_rejected_synchronously() {
        let context = Context::new(48_000.0).expect("context");
        let gain = GainNode::new(&context).expect("gain");
        let result = gain.node().connect(0, gain.node(), 0);
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn port_indices_are_validated_at_the_call_site() {
        let context = Context::new(48_000.0).expect("context");
        let gain = GainNode::new(&context).expect("gain");
        let destination = context.destination();
        assert!(matches!(
            gain.node().connect(1, &destination, 0),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            gain.node().connect(0, &destination, 3),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn disposed_context_rejects_every_operation() {
        let context = Context::new(48_000.0).expect("context");
        let gain = GainNode::new(&context).expect("gain");
        context.dispose();

        assert!(matches!(
            GainNode::new(&context),
            Err(EngineError::Disposed)
        ));
        assert!(matches!(
            gain.node().connect(0, &context.destination(), 0),
            Err(EngineError::Disposed)
        ));
        let mut renderer = OfflineRenderer::new(Arc::clone(&context));
        let mut output = vec![vec![0.0; FRAMES_PER_BLOCK]];
        assert!(matches!(
            renderer.render(&mut output, FRAMES_PER_BLOCK),
            Err(EngineError::Disposed)
        ));
    }

    #[test]
    fn disposing_a_node_invalidates_its_handles() {
        let context = Context::new(48_000.0).expect("context");
        let gain = GainNode::new(&context).expect("gain");
        let destination = context.destination();
        gain.node().connect(0, &destination, 0).unwrap();

        render_once(&context);
        gain.node().dispose();
        render_once(&context);

        assert!(!context.has_node(gain.node().id()));
        assert!(matches!(
            gain.node().connect(0, &destination, 0),
            Err(EngineError::Disposed)
        ));
        assert!(matches!(
            gain.gain().set_value(0.5),
            Err(EngineError::Disposed)
        ));
    }

    #[test]
    fn pool_counters_never_underflow() {
        let context = Context::new(48_000.0).expect("context");
        let (source, _) = counting_source(&context);
        let destination = context.destination();
        source.connect(0, &destination, 0).unwrap();

        render_once(&context);
        source.dispose();
        render_once(&context);

        let stats = context.pool_stats();
        assert!(stats.rents >= stats.returns);
        assert_eq!(stats.outstanding, stats.rents - stats.returns);
    }
}
