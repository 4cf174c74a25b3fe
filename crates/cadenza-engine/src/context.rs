//! The context: time base, command queue and the block entry point.
//!
//! A context is shared between the control plane and exactly one render
//! thread. The graph arena lives in a single-thread cell: only the render
//! thread (latched at the first processed block) ever touches it, either
//! inside `process_block` or inline through `execute_or_post` between
//! blocks.

use crate::block::{BlockBuffer, FRAMES_PER_BLOCK};
use crate::command::Command;
use crate::error::{EngineError, Result};
use crate::graph::{GraphArena, RenderContext};
use crate::node::{NodeId, NodeRef, NodeShell, Processor};
use crate::nodes::destination::DestinationProcessor;
use crate::param::{AudioParam, ParamDescriptor, ParamRef};
use crate::pool::{BufferPool, PoolStats};
use crate::port::{ChannelCountMode, ChannelInterpretation, InputPort, OutputPort};
use cadenza_rt::CommandQueue;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

pub const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;

/// Blocks of each channel layout pre-allocated at construction so the first
/// render never allocates.
const PREWARM_BLOCKS: usize = 16;

struct GraphCell {
    arena: UnsafeCell<GraphArena>,
}

// Safety: the arena is only accessed on the render thread. `process_block`
// latches that thread's identity and `execute_or_post` runs inline only when
// called from it, outside a block.
unsafe impl Send for GraphCell {}
unsafe impl Sync for GraphCell {}

/// Owns the graph, the pool and the time base. Construct with
/// [`Context::new`] and share via `Arc`.
pub struct Context {
    sample_rate: f64,
    pool: BufferPool,
    queue: CommandQueue<Command>,
    graph: GraphCell,
    destination: NodeId,
    destination_alive: Arc<AtomicBool>,
    /// Incremented before each block; the first processed block is 1.
    current_block: AtomicU64,
    /// Seconds as f64 bits, advanced by `128 / sample_rate` after each block.
    current_time: AtomicU64,
    in_render: AtomicBool,
    disposed: AtomicBool,
    render_thread: OnceLock<ThreadId>,
}

impl Context {
    pub fn new(sample_rate: f64) -> Result<Arc<Self>> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(EngineError::argument("sample rate must be positive"));
        }

        let pool = BufferPool::new();
        pool.prewarm(1, PREWARM_BLOCKS);
        pool.prewarm(2, PREWARM_BLOCKS);

        let mut arena = GraphArena::new();
        let destination = NodeId::next();
        let destination_alive = Arc::new(AtomicBool::new(true));
        arena.insert(NodeShell::new(
            destination,
            "destination",
            vec![InputPort::new(
                2,
                ChannelCountMode::Max,
                ChannelInterpretation::Speakers,
            )],
            vec![OutputPort::new()],
            Vec::new(),
            Arc::clone(&destination_alive),
            Box::new(DestinationProcessor),
        ));

        Ok(Arc::new(Self {
            sample_rate,
            pool,
            queue: CommandQueue::new(),
            graph: GraphCell {
                arena: UnsafeCell::new(arena),
            },
            destination,
            destination_alive,
            current_block: AtomicU64::new(0),
            current_time: AtomicU64::new(0f64.to_bits()),
            in_render: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            render_thread: OnceLock::new(),
        }))
    }

    pub fn with_default_rate() -> Result<Arc<Self>> {
        Self::new(DEFAULT_SAMPLE_RATE)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Seconds of audio rendered so far.
    pub fn current_time(&self) -> f64 {
        f64::from_bits(self.current_time.load(Ordering::Acquire))
    }

    pub fn current_block(&self) -> u64 {
        self.current_block.load(Ordering::Acquire)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Handle to the graph's sink. Pulling it drives the whole graph.
    pub fn destination(self: &Arc<Self>) -> NodeRef {
        NodeRef::new(
            Arc::clone(self),
            self.destination,
            "destination",
            1,
            1,
            Arc::clone(&self.destination_alive),
        )
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Marks the context dead; every later public operation fails with
    /// [`EngineError::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(EngineError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Registers a node and returns its handle plus one [`ParamRef`] per
    /// descriptor. The built-in node constructors funnel through here; custom
    /// processors can too.
    pub fn register(
        self: &Arc<Self>,
        label: &'static str,
        inputs: Vec<InputPort>,
        output_count: usize,
        descriptors: &[ParamDescriptor],
        processor: Box<dyn Processor>,
    ) -> Result<(NodeRef, Vec<ParamRef>)> {
        self.ensure_live()?;
        let id = NodeId::next();
        let alive = Arc::new(AtomicBool::new(true));
        let input_count = inputs.len();

        let mut params = Vec::with_capacity(descriptors.len());
        let mut handles = Vec::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter().enumerate() {
            let (param, handle) = AudioParam::create(*descriptor, id, index, &alive);
            params.push(param);
            handles.push(handle);
        }

        let shell = NodeShell::new(
            id,
            label,
            inputs,
            (0..output_count).map(|_| OutputPort::new()).collect(),
            params,
            Arc::clone(&alive),
            processor,
        );
        self.execute_or_post(Command::AddNode(Box::new(shell)));

        Ok((
            NodeRef::new(Arc::clone(self), id, label, input_count, output_count, alive),
            handles,
        ))
    }

    /// Appends a command for the render thread; drained FIFO at the next
    /// block boundary.
    pub(crate) fn post(&self, command: Command) {
        self.queue.push(command);
    }

    /// Runs the command inline iff called from the latched render thread
    /// while no block is being produced; posts otherwise.
    pub(crate) fn execute_or_post(&self, command: Command) {
        let on_render_thread = self
            .render_thread
            .get()
            .is_some_and(|id| *id == thread::current().id());
        if on_render_thread && !self.in_render.load(Ordering::Acquire) {
            // Safety: we are the render thread, between blocks.
            let graph = unsafe { &mut *self.graph.arena.get() };
            let name = command.name();
            if let Err(error) = graph.apply(command, &self.pool) {
                tracing::warn!(command = name, %error, "command failed");
            }
        } else {
            self.post(command);
        }
    }

    /// Produces the next block on the destination node.
    ///
    /// The first call latches the calling thread as the render thread.
    /// Drained command failures are swallowed (logged); errors raised by
    /// node processing propagate to the caller.
    pub(crate) fn process_block(&self) -> Result<()> {
        self.ensure_live()?;
        self.render_thread.get_or_init(|| thread::current().id());

        // Safety: render thread only, per the cell's contract.
        let graph = unsafe { &mut *self.graph.arena.get() };
        while let Some(command) = self.queue.try_pop() {
            let name = command.name();
            if let Err(error) = graph.apply(command, &self.pool) {
                tracing::warn!(command = name, %error, "dropped command");
            }
        }

        let block = self.current_block.fetch_add(1, Ordering::AcqRel) + 1;
        let block_time = self.current_time();

        self.in_render.store(true, Ordering::Release);
        let rc = RenderContext {
            block,
            block_time,
            sample_rate: self.sample_rate,
            pool: &self.pool,
            deferred: &self.queue,
        };
        let result = (&*graph).ensure_processed(self.destination, &rc);
        self.in_render.store(false, Ordering::Release);

        let advanced = block_time + FRAMES_PER_BLOCK as f64 / self.sample_rate;
        self.current_time
            .store(advanced.to_bits(), Ordering::Release);
        result
    }

    /// Renders one block and deinterleaves it into `output`. Graph channels
    /// beyond `channels` are dropped; device channels beyond the graph's are
    /// zeroed.
    pub fn process_block_interleaved(&self, output: &mut [f32], channels: usize) -> Result<()> {
        if channels == 0 {
            return Err(EngineError::argument("channel count must be positive"));
        }
        self.process_block()?;
        output.fill(0.0);
        self.with_destination_block(|block| {
            let Some(block) = block else { return };
            let graph_channels = block.channels();
            for frame in 0..FRAMES_PER_BLOCK {
                for channel in 0..channels.min(graph_channels) {
                    let index = frame * channels + channel;
                    if index < output.len() {
                        output[index] = block.channel(channel)[frame];
                    }
                }
            }
        });
        Ok(())
    }

    /// Read access to the destination's published block. Render thread only;
    /// used by the drivers right after `process_block`.
    pub(crate) fn with_destination_block<R>(&self, f: impl FnOnce(Option<&BlockBuffer>) -> R) -> R {
        // Safety: render thread only, per the cell's contract.
        let graph = unsafe { &*self.graph.arena.get() };
        graph.with_output_opt(self.destination, 0, f)
    }

    #[cfg(test)]
    pub(crate) fn node_count(&self) -> usize {
        let graph = unsafe { &*self.graph.arena.get() };
        graph.node_count()
    }

    #[cfg(test)]
    pub(crate) fn has_node(&self, node: NodeId) -> bool {
        let graph = unsafe { &*self.graph.arena.get() };
        graph.contains(node)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("sample_rate", &self.sample_rate)
            .field("current_block", &self.current_block())
            .field("current_time", &self.current_time())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
