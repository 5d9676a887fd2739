//! Table network nodes: the server and client endpoints that replicate a
//! shared tabletop between players.
//!
//! Every node owns a [`NodeLayer`], a single worker thread that confines the
//! node's mutable state. Remote participants appear as remote nodes that
//! move through `Created → Started → Bound → Stopped`; only bound remote
//! nodes are visible to gameplay code. Table changes travel as
//! [`Increment`](tabletop_table::Increment) patches, applied through the
//! table's own lock.
//!
//! The wire encoding is left to the transport. [`loopback`] connects nodes
//! inside one process.

pub mod client;
pub mod error;
pub mod layer;
pub mod loopback;
pub mod message;
pub mod node;
pub mod password;
pub mod remote;
pub mod server;

#[cfg(test)]
mod testing;

pub use client::{ClientNode, RemoteServerNode};
pub use error::{ExecutionError, NodeError, TransportError};
pub use layer::{Confined, NodeLayer, TaskHandle};
pub use loopback::{LoopbackContext, LoopbackSession};
pub use message::{JoinRejection, NodeMessage, PROTOCOL_VERSION, PlayerInfo};
pub use node::{Node, NodeEvent, NodeSettings};
pub use password::SecurePassword;
pub use remote::{RemoteNode, RemoteNodeController, RemoteNodeState, RemoteTable, ServiceContext};
pub use server::{RemoteClientNode, ServerNode};
