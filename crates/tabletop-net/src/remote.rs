//! Remote nodes: the local proxies for the other side of a connection.
//!
//! Each remote node exposes two facets over the same object. Gameplay and
//! UI code receive the narrow [`RemoteNode`] facet (identity and table
//! access). The transport layer drives the [`RemoteNodeController`] facet
//! through the lifecycle
//!
//! ```text
//! Created --started--> Started --bind--> Bound --stopped--> Stopped
//!                         \________________________stopped____/
//! ```
//!
//! and feeds it inbound messages.

use std::sync::{Arc, OnceLock};

use tabletop_table::{ComponentPath, Increment, Memento};

use crate::error::{NodeError, TransportError};
use crate::layer::{Confined, NodeLayer};
use crate::message::NodeMessage;

// ---------------------------------------------------------------------------
// Transport boundary
// ---------------------------------------------------------------------------

/// One connection as provided by the transport layer.
pub trait ServiceContext: Send + Sync {
    /// Queues `message` for delivery to the peer. Must not block on the
    /// peer's node layer.
    fn send(&self, message: NodeMessage) -> Result<(), TransportError>;

    /// Closes the connection. Later sends fail with
    /// [`TransportError::Closed`]. Idempotent.
    fn close(&self);
}

// ---------------------------------------------------------------------------
// Facets
// ---------------------------------------------------------------------------

/// Lifecycle of a remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteNodeState {
    /// Constructed, no transport attached.
    Created,
    /// Transport session attached, no player name yet.
    Started,
    /// Named and visible to gameplay code.
    Bound,
    /// Terminal.
    Stopped,
}

/// The narrow view of a remote participant handed to gameplay code.
pub trait RemoteNode: Send + Sync {
    /// The remote player's name. Fails before the node is bound.
    fn player_name(&self) -> Result<&str, NodeError>;

    /// The tabletop as seen through this connection. Fails before the node
    /// is bound.
    fn table(&self) -> Result<RemoteTable, NodeError>;
}

/// The lifecycle facet driven by the transport layer.
///
/// Every method must run on the owning node's layer thread.
pub trait RemoteNodeController: RemoteNode {
    /// Current lifecycle state.
    fn state(&self) -> Result<RemoteNodeState, NodeError>;

    /// Attaches the transport session. Created → Started.
    fn started(&self, context: Arc<dyn ServiceContext>) -> Result<(), NodeError>;

    /// Assigns the player name. Started → Bound.
    fn bind(&self, player_name: &str) -> Result<(), NodeError>;

    /// Ends the connection. Started or Bound → Stopped; a bound node is
    /// unbound from its owning node. Calling it again is a no-op.
    fn stopped(&self) -> Result<(), NodeError>;

    /// Handles one inbound message from the peer.
    fn receive(&self, message: NodeMessage) -> Result<(), NodeError>;
}

// ---------------------------------------------------------------------------
// RemoteTable
// ---------------------------------------------------------------------------

/// The shared tabletop as reached through one connection.
///
/// Calls are turned into protocol messages for the peer. Sending never
/// blocks on the peer's node layer, so it is safe from any thread.
#[derive(Clone)]
pub struct RemoteTable {
    player_name: String,
    context: Arc<dyn ServiceContext>,
}

impl RemoteTable {
    /// The player on the other end.
    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    /// Sends a tree patch for the node at `path`.
    pub fn increment_component_state(
        &self,
        path: &ComponentPath,
        increment: &Increment,
    ) -> Result<(), TransportError> {
        tracing::trace!("Sending increment for {path} to `{}`", self.player_name);
        self.context.send(NodeMessage::IncrementComponentState {
            path: path.clone(),
            increment: increment.clone(),
        })
    }

    /// Sends the full table state.
    pub fn set_table_state(&self, memento: &Memento) -> Result<(), TransportError> {
        tracing::debug!("Sending table state to `{}`", self.player_name);
        self.context.send(NodeMessage::TableState(memento.clone()))
    }
}

impl std::fmt::Debug for RemoteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTable")
            .field("player_name", &self.player_name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// RemoteEndpoint
// ---------------------------------------------------------------------------

/// Lifecycle and identity shared by both remote-node roles.
///
/// The state is confined to the owning node's layer. The name and the
/// service context are written once, so the narrow facet can read them from
/// any thread.
pub(crate) struct RemoteEndpoint {
    state: Confined<RemoteNodeState>,
    player_name: OnceLock<String>,
    context: OnceLock<Arc<dyn ServiceContext>>,
}

impl RemoteEndpoint {
    pub(crate) fn new(layer: &NodeLayer) -> Self {
        Self {
            state: Confined::new(layer, RemoteNodeState::Created),
            player_name: OnceLock::new(),
            context: OnceLock::new(),
        }
    }

    pub(crate) fn state(&self) -> Result<RemoteNodeState, NodeError> {
        Ok(*self.state.get()?)
    }

    pub(crate) fn start(&self, context: Arc<dyn ServiceContext>) -> Result<(), NodeError> {
        let mut state = self.state.get()?;
        if *state != RemoteNodeState::Created {
            return Err(NodeError::InvalidTransition {
                state: *state,
                transition: "start",
            });
        }
        self.context
            .set(context)
            .map_err(|_| NodeError::InvalidTransition {
                state: *state,
                transition: "start",
            })?;
        *state = RemoteNodeState::Started;
        Ok(())
    }

    pub(crate) fn bind(&self, player_name: &str) -> Result<(), NodeError> {
        let mut state = self.state.get()?;
        if *state != RemoteNodeState::Started {
            return Err(NodeError::InvalidTransition {
                state: *state,
                transition: "bind",
            });
        }
        if player_name.is_empty() {
            return Err(NodeError::UnnamedRemoteNode);
        }
        self.player_name
            .set(player_name.to_string())
            .map_err(|_| NodeError::InvalidTransition {
                state: *state,
                transition: "bind",
            })?;
        *state = RemoteNodeState::Bound;
        Ok(())
    }

    /// Moves to Stopped and returns the state it left.
    pub(crate) fn stop(&self) -> Result<RemoteNodeState, NodeError> {
        let mut state = self.state.get()?;
        let previous = *state;
        match previous {
            RemoteNodeState::Created => Err(NodeError::InvalidTransition {
                state: previous,
                transition: "stop",
            }),
            RemoteNodeState::Started | RemoteNodeState::Bound | RemoteNodeState::Stopped => {
                *state = RemoteNodeState::Stopped;
                Ok(previous)
            }
        }
    }

    pub(crate) fn player_name(&self) -> Result<&str, NodeError> {
        self.player_name
            .get()
            .map(String::as_str)
            .ok_or(NodeError::NotYetBound)
    }

    pub(crate) fn table(&self) -> Result<RemoteTable, NodeError> {
        let player_name = self.player_name()?.to_string();
        let context = self.context.get().ok_or(NodeError::NotYetBound)?;
        Ok(RemoteTable {
            player_name,
            context: Arc::clone(context),
        })
    }

    /// Sends through the attached context, whatever the lifecycle state.
    pub(crate) fn send(&self, message: NodeMessage) -> Result<(), TransportError> {
        let Some(context) = self.context.get() else {
            return Err(TransportError::Closed);
        };
        tracing::trace!("Sending {}", message.kind());
        context.send(message)
    }

    pub(crate) fn close(&self) {
        if let Some(context) = self.context.get() {
            context.close();
        }
    }
}
