//! Commands posted from the control plane and drained at block boundaries.

use crate::node::{NodeId, NodeMessage, NodeShell};
use crate::port::{ChannelCountMode, ChannelInterpretation};

/// A graph or node mutation executed on the render thread. Tagged rather
/// than closure-based so the full set of mutations is visible in one place.
pub(crate) enum Command {
    AddNode(Box<NodeShell>),
    Connect {
        from: NodeId,
        output: usize,
        to: NodeId,
        input: usize,
    },
    Disconnect {
        from: NodeId,
        output: usize,
        to: NodeId,
        input: usize,
    },
    ConnectToParam {
        from: NodeId,
        output: usize,
        to: NodeId,
        param: usize,
    },
    DisconnectFromParam {
        from: NodeId,
        output: usize,
        to: NodeId,
        param: usize,
    },
    SetChannelConfig {
        node: NodeId,
        input: usize,
        channels: usize,
        mode: ChannelCountMode,
        interpretation: ChannelInterpretation,
    },
    Message {
        node: NodeId,
        message: NodeMessage,
    },
    SetOnEnded {
        node: NodeId,
        callback: Box<dyn FnMut() + Send>,
    },
    Dispose {
        node: NodeId,
    },
}

impl Command {
    /// Short name for drain-loop logging.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::AddNode(_) => "add-node",
            Command::Connect { .. } => "connect",
            Command::Disconnect { .. } => "disconnect",
            Command::ConnectToParam { .. } => "connect-to-param",
            Command::DisconnectFromParam { .. } => "disconnect-from-param",
            Command::SetChannelConfig { .. } => "set-channel-config",
            Command::Message { .. } => "message",
            Command::SetOnEnded { .. } => "set-on-ended",
            Command::Dispose { .. } => "dispose",
        }
    }
}
