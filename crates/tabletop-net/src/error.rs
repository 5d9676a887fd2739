//! Error types for the node layer, the nodes and the transport boundary.

use crate::remote::RemoteNodeState;

/// Why a node-layer task did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The layer was disposed before the task was submitted.
    #[error("node layer is disposed; task rejected")]
    Rejected,

    /// The layer was disposed while the task was still queued.
    #[error("node layer was disposed before the task ran")]
    Cancelled,

    /// The task panicked on the node-layer thread.
    #[error("node-layer task panicked: {0}")]
    Panicked(String),

    /// The node-layer thread tried to wait for a task queued behind itself.
    #[error("waiting on the node-layer thread for a task it has not run yet")]
    Deadlock,

    /// The task did not complete within the requested time.
    #[error("timed out waiting for node-layer task")]
    TimedOut,

    /// The worker thread could not be spawned.
    #[error("failed to spawn node-layer thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Failure reported by a transport service context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// The transport failed to deliver the message.
    #[error("transport failure: {0}")]
    Failed(String),
}

/// Errors raised by node and remote-node operations.
///
/// Most variants are protocol-contract violations: they signal a bug in the
/// caller or the transport layer, not a network condition, and callers
/// should propagate them. See [`NodeError::is_contract_violation`].
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// A remote node with this player name is already bound.
    #[error("a remote node named `{0}` is already bound")]
    AlreadyBound(String),

    /// The remote node is not bound to this node.
    #[error("remote node `{0}` is not bound")]
    NotBound(String),

    /// The remote node has no player name yet.
    #[error("remote node has no player name")]
    UnnamedRemoteNode,

    /// The remote node belongs to a different local node.
    #[error("remote node belongs to a different node")]
    ForeignRemoteNode,

    /// A local node was configured without a player name.
    #[error("player name must not be empty")]
    EmptyPlayerName,

    /// Node-layer confined state was touched from another thread.
    #[error("operation must run on the node-layer thread")]
    NotOnNodeLayerThread,

    /// Node-layer confined state was accessed while already borrowed.
    #[error("re-entrant access to node-layer state")]
    ReentrantStateAccess,

    /// A lifecycle transition was requested from the wrong state.
    #[error("cannot {transition} a remote node in state {state:?}")]
    InvalidTransition {
        /// State at the time of the call.
        state: RemoteNodeState,
        /// The requested transition.
        transition: &'static str,
    },

    /// Identity or table access on a remote node that is not bound yet.
    #[error("remote node is not bound yet")]
    NotYetBound,

    /// A client node already has a server connection.
    #[error("client is already connected to a server")]
    AlreadyConnected,

    /// The node has been disposed.
    #[error("node is disposed")]
    Disposed,

    /// A node-layer task failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl NodeError {
    /// Whether this error reports a broken protocol contract rather than a
    /// runtime condition such as a closed connection or a disposed node.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(
            self,
            Self::Disposed | Self::Execution(_) | Self::Transport(_)
        )
    }
}
