//! An in-process transport joining a client node to a server node.
//!
//! Each session is a pair of [`LoopbackContext`]s over one shared link.
//! Sending through one side queues a `receive` call for the peer's remote
//! node on the peer's node layer, so a send never waits for the other
//! layer. Messages sent before the peer's remote node exists are held back
//! and delivered in order once it is attached.
//!
//! Closing either side closes the link. The peer is told through its remote
//! node's `stopped`, just as a network transport would report a dropped
//! connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::client::{ClientNode, RemoteServerNode};
use crate::error::{NodeError, TransportError};
use crate::layer::NodeLayer;
use crate::message::NodeMessage;
use crate::remote::{RemoteNodeController, ServiceContext};
use crate::server::{RemoteClientNode, ServerNode};

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Anything that owns a node layer.
trait LayerOwner: Send + Sync {
    fn layer(&self) -> &NodeLayer;
}

impl LayerOwner for ServerNode {
    fn layer(&self) -> &NodeLayer {
        ServerNode::layer(self)
    }
}

impl LayerOwner for ClientNode {
    fn layer(&self) -> &NodeLayer {
        ClientNode::layer(self)
    }
}

/// The receiving end of one direction: a remote node and the layer it lives
/// on.
struct PeerEndpoint {
    owner: Weak<dyn LayerOwner>,
    remote: Arc<dyn RemoteNodeController>,
}

impl PeerEndpoint {
    fn deliver(&self, message: NodeMessage) -> Result<(), TransportError> {
        let Some(owner) = self.owner.upgrade() else {
            return Err(TransportError::Closed);
        };
        let remote = Arc::clone(&self.remote);
        owner
            .layer()
            .async_exec(move || {
                let kind = message.kind();
                if let Err(e) = remote.receive(message) {
                    tracing::warn!("Failed to handle {kind}: {e}");
                }
            })
            .map(drop)
            .map_err(|_| TransportError::Closed)
    }

    fn disconnect(&self) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let remote = Arc::clone(&self.remote);
        let scheduled = owner.layer().async_exec(move || {
            if let Err(e) = remote.stopped() {
                tracing::warn!("Failed to stop remote node: {e}");
            }
        });
        if scheduled.is_err() {
            tracing::debug!("Peer layer already disposed");
        }
    }
}

#[derive(Default)]
struct Direction {
    endpoint: Option<PeerEndpoint>,
    backlog: Vec<NodeMessage>,
}

/// State shared by both sides of a session.
#[derive(Default)]
struct Link {
    closed: AtomicBool,
    /// Indexed by the sending side.
    directions: [Mutex<Direction>; 2],
}

impl Link {
    /// Closes the link and drops both endpoints. The receiving end of
    /// `side`, and of the opposite side too when `notify_both`, is told the
    /// connection is gone.
    fn close(&self, side: usize, notify_both: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let outbound = self.directions[side].lock().endpoint.take();
        let inbound = self.directions[1 - side].lock().endpoint.take();
        if let Some(peer) = outbound {
            peer.disconnect();
        }
        if notify_both && let Some(own) = inbound {
            own.disconnect();
        }
    }
}

// ---------------------------------------------------------------------------
// LoopbackContext
// ---------------------------------------------------------------------------

/// One side of an in-process connection.
pub struct LoopbackContext {
    link: Arc<Link>,
    side: usize,
}

impl LoopbackContext {
    /// Creates the two connected sides of a new link.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let link = Arc::new(Link::default());
        (
            Arc::new(Self {
                link: Arc::clone(&link),
                side: 0,
            }),
            Arc::new(Self { link, side: 1 }),
        )
    }

    /// Whether the link has been closed, by either side.
    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::Acquire)
    }

    /// Sets the remote node that receives messages sent through this side
    /// and flushes anything sent so far.
    fn attach(&self, owner: Weak<dyn LayerOwner>, remote: Arc<dyn RemoteNodeController>) {
        let mut direction = self.link.directions[self.side].lock();
        let endpoint = PeerEndpoint { owner, remote };
        for message in direction.backlog.drain(..) {
            if let Err(e) = endpoint.deliver(message) {
                tracing::debug!("Dropped queued message: {e}");
            }
        }
        // Closed before the peer was attached: what was sent still arrives,
        // followed by the disconnect.
        if self.is_closed() {
            drop(direction);
            endpoint.disconnect();
            return;
        }
        direction.endpoint = Some(endpoint);
    }
}

impl ServiceContext for LoopbackContext {
    fn send(&self, message: NodeMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut direction = self.link.directions[self.side].lock();
        match &direction.endpoint {
            Some(endpoint) => endpoint.deliver(message),
            None => {
                direction.backlog.push(message);
                Ok(())
            }
        }
    }

    fn close(&self) {
        self.link.close(self.side, false);
    }
}

impl std::fmt::Debug for LoopbackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackContext")
            .field("side", &self.side)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A live in-process connection between one server and one client.
#[derive(Debug)]
pub struct LoopbackSession {
    server_side: Arc<LoopbackContext>,
    remote_client: Arc<RemoteClientNode>,
    remote_server: Arc<RemoteServerNode>,
}

impl LoopbackSession {
    /// The server's proxy for the client.
    pub fn remote_client(&self) -> &Arc<RemoteClientNode> {
        &self.remote_client
    }

    /// The client's proxy for the server.
    pub fn remote_server(&self) -> &Arc<RemoteServerNode> {
        &self.remote_server
    }

    /// Whether either side has closed the connection.
    pub fn is_closed(&self) -> bool {
        self.server_side.is_closed()
    }

    /// Drops the connection under both nodes, as a failing network would.
    pub fn sever(&self) {
        tracing::info!("Severing loopback session");
        self.server_side.link.close(self.server_side.side, true);
    }
}

/// Connects `client` to `server` and starts the join handshake.
///
/// Returns once the client's `Hello` is on its way; the outcome arrives as
/// [`NodeEvent`](crate::NodeEvent)s on both nodes. Must not be called from
/// either node's layer thread.
pub fn connect(
    server: &Arc<ServerNode>,
    client: &Arc<ClientNode>,
) -> Result<LoopbackSession, NodeError> {
    let (server_side, client_side) = LoopbackContext::pair();

    let s = Arc::clone(server);
    let ctx: Arc<dyn ServiceContext> = server_side.clone();
    let remote_client = server.layer().sync_exec(move || s.accept(ctx))??;
    let server_owner: Weak<dyn LayerOwner> = Arc::downgrade(server) as Weak<dyn LayerOwner>;
    client_side.attach(server_owner, remote_client.clone());

    let c = Arc::clone(client);
    let ctx: Arc<dyn ServiceContext> = client_side.clone();
    let remote_server = match client.layer().sync_exec(move || c.connect(ctx)) {
        Ok(Ok(remote)) => remote,
        Ok(Err(e)) => {
            client_side.close();
            return Err(e);
        }
        Err(e) => {
            client_side.close();
            return Err(e.into());
        }
    };
    let client_owner: Weak<dyn LayerOwner> = Arc::downgrade(client) as Weak<dyn LayerOwner>;
    server_side.attach(client_owner, remote_server.clone());

    tracing::debug!(
        "Loopback session opened between `{}` and `{}`",
        server.player_name(),
        client.player_name()
    );
    Ok(LoopbackSession {
        server_side,
        remote_client,
        remote_server,
    })
}

#[cfg(test)]
#[path = "loopback_tests.rs"]
mod tests;
