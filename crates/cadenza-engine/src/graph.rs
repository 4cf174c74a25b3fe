//! The node arena and the block-synchronous pull scheduler.
//!
//! Connections are `(NodeId, port)` pairs resolved against this arena, so
//! the graph may be cyclic in connection without being cyclic in ownership.
//! A pull that reaches a node already producing its block is the cycle
//! detector: the `RefCell` borrow doubles as the in-progress flag and is
//! released on every exit path.

use crate::block::{MAX_CHANNELS, MIN_CHANNELS};
use crate::command::Command;
use crate::error::{EngineError, Result};
use crate::node::{Inputs, NodeId, NodeShell, ProcessScope};
use crate::pool::BufferPool;
use crate::port::{Connection, InputTarget};
use cadenza_rt::CommandQueue;
use std::cell::RefCell;
use std::collections::HashMap;

/// Per-block state handed down through the pull recursion.
pub(crate) struct RenderContext<'a> {
    pub block: u64,
    pub block_time: f64,
    pub sample_rate: f64,
    pub pool: &'a BufferPool,
    /// Queue for work a node schedules against a later block (self-dispose
    /// after `ended`); drained with every other command.
    pub deferred: &'a CommandQueue<Command>,
}

pub(crate) struct GraphArena {
    nodes: HashMap<NodeId, RefCell<NodeShell>>,
    labels: HashMap<NodeId, &'static str>,
}

impl GraphArena {
    pub(crate) fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, shell: NodeShell) {
        self.labels.insert(shell.id, shell.label);
        self.nodes.insert(shell.id, RefCell::new(shell));
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    #[cfg(test)]
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Applies one control command. Errors are reported to the drain loop,
    /// which logs and swallows them.
    pub(crate) fn apply(&mut self, command: Command, pool: &BufferPool) -> Result<()> {
        match command {
            Command::AddNode(shell) => {
                self.insert(*shell);
                Ok(())
            }
            Command::Connect {
                from,
                output,
                to,
                input,
            } => self.connect(from, output, to, input),
            Command::Disconnect {
                from,
                output,
                to,
                input,
            } => self.disconnect(from, output, to, input),
            Command::ConnectToParam {
                from,
                output,
                to,
                param,
            } => self.connect_to_param(from, output, to, param),
            Command::DisconnectFromParam {
                from,
                output,
                to,
                param,
            } => self.disconnect_from_param(from, output, to, param),
            Command::SetChannelConfig {
                node,
                input,
                channels,
                mode,
                interpretation,
            } => {
                let cell = self.cell(node)?;
                let mut shell = cell.borrow_mut();
                let port = shell
                    .inputs
                    .get_mut(input)
                    .ok_or_else(|| EngineError::argument(format!("no input {input}")))?;
                port.set_config(channels, mode, interpretation);
                Ok(())
            }
            Command::Message { node, message } => {
                let cell = self.cell(node)?;
                cell.borrow_mut().processor.message(message);
                Ok(())
            }
            Command::SetOnEnded { node, callback } => {
                let cell = self.cell(node)?;
                cell.borrow_mut().on_ended = Some(callback);
                Ok(())
            }
            Command::Dispose { node } => {
                self.dispose(node, pool);
                Ok(())
            }
        }
    }

    /// Drives `node` to produce its block, memoized per block number.
    ///
    /// An id with no arena entry is a broken connection and pulls as silence.
    pub(crate) fn ensure_processed(&self, id: NodeId, rc: &RenderContext<'_>) -> Result<()> {
        let Some(cell) = self.nodes.get(&id) else {
            return Ok(());
        };
        let mut guard = match cell.try_borrow_mut() {
            Ok(guard) => guard,
            // The node is producing its block further up this pull: a cycle.
            Err(_) => {
                return Err(EngineError::GraphCycle {
                    node: id,
                    label: self.labels.get(&id).copied().unwrap_or("node"),
                })
            }
        };
        if guard.last_block == rc.block {
            return Ok(());
        }
        guard.last_block = rc.block;

        let shell = &mut *guard;
        for param in &mut shell.params {
            param.process(self, rc)?;
        }
        for input in &mut shell.inputs {
            input.pull(self, rc)?;
        }

        for index in 0..shell.outputs.len() {
            let channels = shell
                .processor
                .output_channels(index, &Inputs::new(&shell.inputs))
                .clamp(MIN_CHANNELS, MAX_CHANNELS);
            shell.outputs[index].prepare(channels, rc.pool);
        }

        let ended = {
            let NodeShell {
                inputs,
                outputs,
                params,
                processor,
                ..
            } = &mut *shell;
            let mut scope = ProcessScope::new(
                rc.sample_rate,
                rc.block_time,
                rc.block,
                inputs,
                outputs,
                params,
            );
            processor.process(&mut scope)?;
            scope.ended()
        };

        if ended && !shell.ended_fired {
            shell.ended_fired = true;
            if let Some(callback) = shell.on_ended.as_mut() {
                callback();
            }
            rc.deferred.push(Command::Dispose { node: id });
        }
        Ok(())
    }

    /// Reads a node's published output block, if the node exists, is not
    /// currently in progress and has published one.
    pub(crate) fn with_output<R>(
        &self,
        node: NodeId,
        output: usize,
        f: impl FnOnce(&crate::block::BlockBuffer) -> R,
    ) -> Option<R> {
        let cell = self.nodes.get(&node)?;
        let shell = cell.try_borrow().ok()?;
        let buffer = shell.outputs.get(output)?.buffer()?;
        Some(f(buffer))
    }

    pub(crate) fn output_channel_count(&self, node: NodeId, output: usize) -> Option<usize> {
        self.with_output(node, output, |buffer| buffer.channels())
    }

    /// Like [`with_output`](Self::with_output) but always invokes the
    /// closure, passing `None` when no block is readable.
    pub(crate) fn with_output_opt<R>(
        &self,
        node: NodeId,
        output: usize,
        f: impl FnOnce(Option<&crate::block::BlockBuffer>) -> R,
    ) -> R {
        let Some(cell) = self.nodes.get(&node) else {
            return f(None);
        };
        let Ok(shell) = cell.try_borrow() else {
            return f(None);
        };
        f(shell.outputs.get(output).and_then(|port| port.buffer()))
    }

    fn connect(&mut self, from: NodeId, output: usize, to: NodeId, input: usize) -> Result<()> {
        if from == to {
            return Err(EngineError::argument("cannot connect a node to itself"));
        }
        let (src_cell, dst_cell) = (self.cell(from)?, self.cell(to)?);
        let mut src = src_cell.borrow_mut();
        let mut dst = dst_cell.borrow_mut();
        let port = dst
            .inputs
            .get_mut(input)
            .ok_or_else(|| EngineError::argument(format!("no input {input}")))?;
        let source = src
            .outputs
            .get_mut(output)
            .ok_or_else(|| EngineError::argument(format!("no output {output}")))?;
        port.connect(Connection { node: from, output });
        source.add_consumer(InputTarget::Port { node: to, input });
        Ok(())
    }

    fn disconnect(&mut self, from: NodeId, output: usize, to: NodeId, input: usize) -> Result<()> {
        if let Ok(cell) = self.cell(to) {
            if let Some(port) = cell.borrow_mut().inputs.get_mut(input) {
                port.disconnect(Connection { node: from, output });
            }
        }
        if let Ok(cell) = self.cell(from) {
            if let Some(port) = cell.borrow_mut().outputs.get_mut(output) {
                port.remove_consumer(InputTarget::Port { node: to, input });
            }
        }
        Ok(())
    }

    fn connect_to_param(
        &mut self,
        from: NodeId,
        output: usize,
        to: NodeId,
        param: usize,
    ) -> Result<()> {
        if from == to {
            return Err(EngineError::argument(
                "cannot modulate a parameter of the same node",
            ));
        }
        let (src_cell, dst_cell) = (self.cell(from)?, self.cell(to)?);
        let mut src = src_cell.borrow_mut();
        let mut dst = dst_cell.borrow_mut();
        let target = dst
            .params
            .get_mut(param)
            .ok_or_else(|| EngineError::argument(format!("no parameter {param}")))?;
        let source = src
            .outputs
            .get_mut(output)
            .ok_or_else(|| EngineError::argument(format!("no output {output}")))?;
        target.input_mut().connect(Connection { node: from, output });
        source.add_consumer(InputTarget::Param { node: to, param });
        Ok(())
    }

    fn disconnect_from_param(
        &mut self,
        from: NodeId,
        output: usize,
        to: NodeId,
        param: usize,
    ) -> Result<()> {
        if let Ok(cell) = self.cell(to) {
            if let Some(target) = cell.borrow_mut().params.get_mut(param) {
                target.input_mut().disconnect(Connection { node: from, output });
            }
        }
        if let Ok(cell) = self.cell(from) {
            if let Some(port) = cell.borrow_mut().outputs.get_mut(output) {
                port.remove_consumer(InputTarget::Param { node: to, param });
            }
        }
        Ok(())
    }

    /// Removes the node, strips every connection referencing it, returns its
    /// leased blocks to the pool and runs the processor's cleanup. Absent
    /// nodes make this a no-op.
    pub(crate) fn dispose(&mut self, id: NodeId, pool: &BufferPool) {
        let Some(cell) = self.nodes.remove(&id) else {
            return;
        };
        self.labels.remove(&id);
        let mut shell = cell.into_inner();
        shell.alive.store(false, std::sync::atomic::Ordering::Release);

        for other in self.nodes.values() {
            let mut other = other.borrow_mut();
            for input in &mut other.inputs {
                input.disconnect_node(id);
            }
            for param in &mut other.params {
                param.input_mut().disconnect_node(id);
            }
            for output in &mut other.outputs {
                output.remove_consumers_of(id);
            }
        }

        for output in &mut shell.outputs {
            if let Some(buffer) = output.take_buffer() {
                pool.recycle(buffer);
            }
        }
        for input in &mut shell.inputs {
            if let Some(buffer) = input.take_buffer() {
                pool.recycle(buffer);
            }
        }
        for param in &mut shell.params {
            if let Some(buffer) = param.input_mut().take_buffer() {
                pool.recycle(buffer);
            }
        }
        shell.processor.on_dispose();
    }

    fn cell(&self, id: NodeId) -> Result<&RefCell<NodeShell>> {
        self.nodes
            .get(&id)
            .ok_or_else(|| EngineError::operation(format!("node {id} has been disposed")))
    }
}
