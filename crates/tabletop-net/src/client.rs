//! The joining side: a player's node and its single remote server node.

use std::sync::{Arc, Weak};

use crossbeam_channel::Receiver;
use tabletop_config::Config;
use tabletop_table::{
    ComponentPath, Increment, Memento, PatchReport, Registries, Table, TableObject,
};

use crate::error::{ExecutionError, NodeError};
use crate::layer::{Confined, NodeLayer};
use crate::message::{JoinRejection, NodeMessage, PROTOCOL_VERSION, PlayerInfo};
use crate::node::{Node, NodeEvent, NodeSettings};
use crate::password::SecurePassword;
use crate::remote::{
    RemoteEndpoint, RemoteNode, RemoteNodeController, RemoteNodeState, RemoteTable,
    ServiceContext,
};

// ---------------------------------------------------------------------------
// ClientNode
// ---------------------------------------------------------------------------

/// A player's node, connected to at most one server at a time.
pub struct ClientNode {
    node: Node<RemoteServerNode>,
    /// The current connection, bound or still in the handshake.
    connection: Confined<Option<Arc<RemoteServerNode>>>,
    players: Confined<Vec<PlayerInfo>>,
    this: Weak<ClientNode>,
}

impl ClientNode {
    /// Creates a client whose local copy of the table is `table`.
    pub fn new(
        settings: NodeSettings,
        registries: Registries,
        table: Arc<Table>,
    ) -> Result<Arc<Self>, NodeError> {
        let node = Node::new(settings, registries, table)?;
        let connection = Confined::new(node.layer(), None);
        let players = Confined::new(node.layer(), Vec::new());
        Ok(Arc::new_cyclic(|this| Self {
            node,
            connection,
            players,
            this: this.clone(),
        }))
    }

    /// Creates a client from the `node` section of `config`.
    pub fn from_config(
        config: &Config,
        registries: Registries,
        table: Arc<Table>,
    ) -> Result<Arc<Self>, NodeError> {
        Self::new(NodeSettings::from_config(&config.node), registries, table)
    }

    /// The shared node state.
    pub fn node(&self) -> &Node<RemoteServerNode> {
        &self.node
    }

    /// The local player's name.
    pub fn player_name(&self) -> &str {
        self.node.player_name()
    }

    /// A copy of the password presented to servers. Confined.
    pub fn password(&self) -> Result<SecurePassword, NodeError> {
        self.node.password()
    }

    /// The node layer.
    pub fn layer(&self) -> &NodeLayer {
        self.node.layer()
    }

    /// The local copy of the table.
    pub fn table(&self) -> &Arc<Table> {
        self.node.table()
    }

    /// A receiver for this node's events.
    pub fn events(&self) -> Receiver<NodeEvent> {
        self.node.events()
    }

    /// Starts the join handshake over `context`. Confined.
    ///
    /// The returned remote server node is bound once the server's `Welcome`
    /// arrives.
    pub fn connect(
        &self,
        context: Arc<dyn ServiceContext>,
    ) -> Result<Arc<RemoteServerNode>, NodeError> {
        self.node.ensure_live()?;
        let current = self.connection.get()?.clone();
        if let Some(current) = current
            && current.state()? != RemoteNodeState::Stopped
        {
            return Err(NodeError::AlreadyConnected);
        }

        let remote = RemoteServerNode::new(self);
        remote.started(context)?;
        *self.connection.get()? = Some(Arc::clone(&remote));

        let hello = NodeMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            player_name: self.player_name().to_string(),
            password: self.node.password()?,
        };
        if let Err(e) = remote.endpoint.send(hello) {
            tracing::warn!("Could not reach server: {e}");
            remote.stopped()?;
            return Err(e.into());
        }
        tracing::info!("`{}` asked to join", self.player_name());
        Ok(remote)
    }

    /// Whether the handshake has completed and the connection is up.
    /// Confined.
    pub fn is_connected(&self) -> Result<bool, NodeError> {
        Ok(!self.node.bound_player_names()?.is_empty())
    }

    /// The server's narrow facet, once connected. Confined.
    pub fn server(&self) -> Result<Option<Arc<dyn RemoteNode>>, NodeError> {
        Ok(self.node.remote_nodes()?.into_iter().next())
    }

    /// The player list last received from the server. Confined.
    pub fn players(&self) -> Result<Vec<PlayerInfo>, NodeError> {
        Ok(self.players.get()?.clone())
    }

    /// Registers the bound remote server node. Confined.
    pub fn bind_remote_node(&self, remote: Arc<RemoteServerNode>) -> Result<(), NodeError> {
        if !remote.belongs_to(self) {
            return Err(NodeError::ForeignRemoteNode);
        }
        self.node.bind_remote_node(remote)
    }

    /// Removes the bound remote server node. Confined.
    pub fn unbind_remote_node(&self, remote: &Arc<RemoteServerNode>) -> Result<(), NodeError> {
        if !remote.belongs_to(self) {
            return Err(NodeError::ForeignRemoteNode);
        }
        self.node.unbind_remote_node(remote)
    }

    /// Applies a local edit and forwards it to the server.
    ///
    /// Callable from any thread. The patch is applied and its send is queued
    /// in one node-layer job, ordered with the patches arriving from the
    /// server. Off the layer this blocks until the job has run; the caller
    /// must not hold the table lock. Without a connection the edit stays
    /// local.
    pub fn publish_increment(
        &self,
        path: ComponentPath,
        increment: Increment,
    ) -> Result<PatchReport, NodeError> {
        let this = self.this.upgrade().ok_or(NodeError::Disposed)?;
        self.layer()
            .sync_exec(move || this.apply_and_forward(&path, &increment))?
    }

    /// Applies `edit` to the table and publishes it as tree patches.
    ///
    /// Callable from any thread, under the same rules as
    /// [`ClientNode::publish_increment`]. The table stays locked from the
    /// diff until the last patch is applied. Returns one report per patch.
    pub fn publish_edit(
        &self,
        edit: impl FnOnce(&mut TableObject) + Send + 'static,
    ) -> Result<Vec<PatchReport>, NodeError> {
        let this = self.this.upgrade().ok_or(NodeError::Disposed)?;
        self.layer().sync_exec(move || {
            let _lock = this.table().lock();
            this.node
                .diff_edit(edit)
                .into_iter()
                .map(|(path, increment)| this.apply_and_forward(&path, &increment))
                .collect::<Result<Vec<_>, NodeError>>()
        })?
    }

    /// Leaves the table. Confined.
    pub fn disconnect(&self) -> Result<(), NodeError> {
        let current = self.connection.get()?.clone();
        let Some(remote) = current else {
            return Ok(());
        };
        if let Err(e) = remote.endpoint.send(NodeMessage::Goodbye) {
            tracing::debug!("Goodbye not delivered: {e}");
        }
        remote.endpoint.close();
        remote.stopped()
    }

    /// Disconnects, zeroes the password and disposes the node layer.
    ///
    /// Callable from any thread; off the layer it blocks until done.
    /// Idempotent.
    pub fn dispose(&self) -> Result<(), NodeError> {
        if !self.layer().is_node_layer_thread() {
            let this = self.this.upgrade().ok_or(NodeError::Disposed)?;
            return match self.layer().sync_exec(move || this.dispose()) {
                Ok(result) => result,
                Err(ExecutionError::Rejected) => Ok(()),
                Err(e) => Err(e.into()),
            };
        }
        if !self.node.begin_dispose()? {
            return Ok(());
        }
        if let Err(e) = self.disconnect() {
            tracing::warn!("Failed to disconnect during dispose: {e}");
        }
        self.node.finish_dispose()
    }

    // --- Inbound ---

    /// Applies a local patch, then schedules its sends. Confined.
    fn apply_and_forward(
        &self,
        path: &ComponentPath,
        increment: &Increment,
    ) -> Result<PatchReport, NodeError> {
        self.node.ensure_live()?;
        let report = self
            .node
            .applier()
            .increment_component_state(self.table(), path, increment);
        if report.resolved
            && let Err(e) = self.forward(path, increment)
        {
            tracing::warn!("Failed to forward increment for {path}: {e}");
        }
        Ok(report)
    }

    fn forward(&self, path: &ComponentPath, increment: &Increment) -> Result<(), NodeError> {
        let Some(server) = self.node.bound_remote_nodes()?.into_iter().next() else {
            tracing::debug!("Not connected; increment for {path} stays local");
            return Ok(());
        };
        server.table()?.increment_component_state(path, increment)?;
        Ok(())
    }

    fn handle_welcome(
        &self,
        remote: &Arc<RemoteServerNode>,
        server_player_name: String,
        players: Vec<PlayerInfo>,
    ) -> Result<(), NodeError> {
        if remote.state()? != RemoteNodeState::Started {
            tracing::warn!("Ignoring repeated Welcome from `{server_player_name}`");
            return Ok(());
        }
        remote.bind(&server_player_name)?;
        self.bind_remote_node(Arc::clone(remote))?;
        self.players.get()?.clone_from(&players);

        tracing::info!(
            "`{}` joined the table hosted by `{server_player_name}`",
            self.player_name()
        );
        self.node.emit(NodeEvent::Connected { server_player_name });
        self.node.emit(NodeEvent::PlayersUpdated(players));
        Ok(())
    }

    fn handle_rejected(
        &self,
        remote: &Arc<RemoteServerNode>,
        rejection: JoinRejection,
    ) -> Result<(), NodeError> {
        tracing::warn!("Join refused: {rejection}");
        self.node.emit(NodeEvent::Disconnected {
            reason: rejection.to_string(),
        });
        remote.stopped()
    }

    fn handle_players(
        &self,
        remote: &Arc<RemoteServerNode>,
        players: Vec<PlayerInfo>,
    ) -> Result<(), NodeError> {
        if remote.state()? != RemoteNodeState::Bound {
            tracing::warn!("Ignoring player list before joining");
            return Ok(());
        }
        self.players.get()?.clone_from(&players);
        self.node.emit(NodeEvent::PlayersUpdated(players));
        Ok(())
    }

    fn handle_table_state(
        &self,
        remote: &Arc<RemoteServerNode>,
        memento: &Memento,
    ) -> Result<(), NodeError> {
        if remote.state()? != RemoteNodeState::Bound {
            tracing::warn!("Ignoring table state before joining");
            return Ok(());
        }
        if self
            .node
            .applier()
            .set_table_state(self.table(), memento)
            .is_ok()
        {
            self.node.emit(NodeEvent::TableUpdated);
        }
        Ok(())
    }

    fn handle_increment(
        &self,
        remote: &Arc<RemoteServerNode>,
        path: &ComponentPath,
        increment: &Increment,
    ) -> Result<(), NodeError> {
        if remote.state()? != RemoteNodeState::Bound {
            tracing::warn!("Ignoring increment before joining");
            return Ok(());
        }
        let report = self
            .node
            .applier()
            .increment_component_state(self.table(), path, increment);
        if report.resolved {
            self.node.emit(NodeEvent::TableUpdated);
        }
        Ok(())
    }

    fn server_stopped(
        &self,
        remote: &Arc<RemoteServerNode>,
        previous: RemoteNodeState,
    ) -> Result<(), NodeError> {
        {
            let mut connection = self.connection.get()?;
            if connection
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, remote))
            {
                *connection = None;
            }
        }
        if previous != RemoteNodeState::Bound {
            return Ok(());
        }
        self.unbind_remote_node(remote)?;
        self.players.get()?.clear();
        tracing::info!("`{}` left the table", self.player_name());
        self.node.emit(NodeEvent::Disconnected {
            reason: "connection closed".to_string(),
        });
        Ok(())
    }
}

impl std::fmt::Debug for ClientNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientNode")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// RemoteServerNode
// ---------------------------------------------------------------------------

/// The client-side proxy for the server.
pub struct RemoteServerNode {
    endpoint: RemoteEndpoint,
    client: Weak<ClientNode>,
    this: Weak<RemoteServerNode>,
}

impl RemoteServerNode {
    /// Creates a remote server node owned by `client`, in state `Created`.
    pub fn new(client: &ClientNode) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            endpoint: RemoteEndpoint::new(client.layer()),
            client: client.this.clone(),
            this: this.clone(),
        })
    }

    fn belongs_to(&self, client: &ClientNode) -> bool {
        self.client.ptr_eq(&client.this)
    }

    fn owner(&self) -> Result<(Arc<ClientNode>, Arc<Self>), NodeError> {
        let client = self.client.upgrade().ok_or(NodeError::Disposed)?;
        let this = self.this.upgrade().ok_or(NodeError::Disposed)?;
        Ok((client, this))
    }
}

impl RemoteNode for RemoteServerNode {
    fn player_name(&self) -> Result<&str, NodeError> {
        self.endpoint.player_name()
    }

    fn table(&self) -> Result<RemoteTable, NodeError> {
        self.endpoint.table()
    }
}

impl RemoteNodeController for RemoteServerNode {
    fn state(&self) -> Result<RemoteNodeState, NodeError> {
        self.endpoint.state()
    }

    fn started(&self, context: Arc<dyn ServiceContext>) -> Result<(), NodeError> {
        self.endpoint.start(context)?;
        tracing::debug!("Remote server connection started");
        Ok(())
    }

    fn bind(&self, player_name: &str) -> Result<(), NodeError> {
        self.endpoint.bind(player_name)
    }

    fn stopped(&self) -> Result<(), NodeError> {
        let previous = self.endpoint.stop()?;
        if previous == RemoteNodeState::Stopped {
            return Ok(());
        }
        let Ok((client, this)) = self.owner() else {
            return Ok(());
        };
        client.server_stopped(&this, previous)
    }

    fn receive(&self, message: NodeMessage) -> Result<(), NodeError> {
        tracing::trace!("Client received {}", message.kind());
        let (client, this) = self.owner()?;
        match message {
            NodeMessage::Welcome {
                server_player_name,
                players,
            } => client.handle_welcome(&this, server_player_name, players),
            NodeMessage::Rejected(rejection) => client.handle_rejected(&this, rejection),
            NodeMessage::Players(players) => client.handle_players(&this, players),
            NodeMessage::TableState(memento) => client.handle_table_state(&this, &memento),
            NodeMessage::IncrementComponentState { path, increment } => {
                client.handle_increment(&this, &path, &increment)
            }
            NodeMessage::Goodbye => self.stopped(),
            NodeMessage::Hello { .. } => {
                tracing::warn!("Ignoring Hello sent by the server");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for RemoteServerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteServerNode")
            .field("player_name", &self.endpoint.player_name().ok())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::test_support::RecordingContext;
    use crate::testing;

    fn client() -> Arc<ClientNode> {
        let settings = NodeSettings::new("alice").with_password(SecurePassword::new("pw"));
        ClientNode::new(settings, testing::registries(), testing::empty_table()).unwrap()
    }

    fn connect(client: &Arc<ClientNode>) -> (Arc<RecordingContext>, Arc<RemoteServerNode>) {
        let context = RecordingContext::new();
        let ctx: Arc<dyn ServiceContext> = context.clone();
        let c = Arc::clone(client);
        let remote = client.layer().sync_exec(move || c.connect(ctx)).unwrap().unwrap();
        (context, remote)
    }

    #[test]
    fn test_connect_sends_hello_with_password_copy() {
        let client = client();
        let (context, _remote) = connect(&client);
        let sent = context.sent();
        assert_eq!(sent.len(), 1);
        let NodeMessage::Hello {
            protocol_version,
            player_name,
            password,
        } = &sent[0]
        else {
            panic!("expected Hello, got {:?}", sent[0]);
        };
        assert_eq!(*protocol_version, PROTOCOL_VERSION);
        assert_eq!(player_name, "alice");
        assert_eq!(*password, SecurePassword::new("pw"));
    }

    #[test]
    fn test_second_connect_rejected() {
        let client = client();
        let _first = connect(&client);
        let c = Arc::clone(&client);
        let result = client
            .layer()
            .sync_exec(move || c.connect(RecordingContext::new()).map(|_| ()))
            .unwrap();
        assert!(matches!(result, Err(NodeError::AlreadyConnected)));
    }

    #[test]
    fn test_welcome_binds_server() {
        let client = client();
        let events = client.events();
        let (_context, remote) = connect(&client);

        let c = Arc::clone(&client);
        let (connected, server_name) = client
            .layer()
            .sync_exec(move || {
                remote.receive(NodeMessage::Welcome {
                    server_player_name: "host".into(),
                    players: Vec::new(),
                })?;
                let server_name = c
                    .server()?
                    .map(|server| server.player_name().map(str::to_string))
                    .transpose()?;
                Ok::<_, NodeError>((c.is_connected()?, server_name))
            })
            .unwrap()
            .unwrap();
        assert!(connected);
        assert_eq!(server_name.as_deref(), Some("host"));
        assert_eq!(
            events.try_recv().unwrap(),
            NodeEvent::Connected {
                server_player_name: "host".into()
            }
        );
    }

    #[test]
    fn test_rejection_stops_connection() {
        let client = client();
        let events = client.events();
        let (_context, remote) = connect(&client);

        let c = Arc::clone(&client);
        let (state, connected) = client
            .layer()
            .sync_exec(move || {
                remote.receive(NodeMessage::Rejected(JoinRejection::BadPassword))?;
                Ok::<_, NodeError>((remote.state()?, c.is_connected()?))
            })
            .unwrap()
            .unwrap();
        assert_eq!(state, RemoteNodeState::Stopped);
        assert!(!connected);
        assert!(matches!(
            events.try_recv().unwrap(),
            NodeEvent::Disconnected { reason } if reason == "incorrect table password"
        ));
    }

    #[test]
    fn test_unjoined_table_state_ignored() {
        let client = client();
        let events = client.events();
        let (_context, remote) = connect(&client);
        client
            .layer()
            .sync_exec(move || remote.receive(NodeMessage::TableState(Memento::new())))
            .unwrap()
            .unwrap();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_connection_stays_local() {
        let client = client();
        let report = client
            .publish_increment(ComponentPath::root(), tabletop_table::ComponentIncrement::new().into())
            .unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn test_publish_after_dispose_leaves_table_alone() {
        let client = client();
        client.dispose().unwrap();

        let moved = tabletop_table::ComponentIncrement::new()
            .with_location(tabletop_table::Point::new(3, 3));
        let result = client.publish_increment(ComponentPath::root(), moved.into());
        assert!(matches!(
            result,
            Err(NodeError::Execution(ExecutionError::Rejected))
        ));
        assert_eq!(
            client.table().lock().tabletop().location(),
            tabletop_table::Point::new(0, 0)
        );
    }

    #[test]
    fn test_dispose_sends_goodbye_and_rejects_work() {
        let client = client();
        let (context, _remote) = connect(&client);
        client.dispose().unwrap();
        client.dispose().unwrap();
        assert_eq!(context.kinds(), vec!["Hello", "Goodbye"]);
        assert!(context.is_closed());
        assert!(client.layer().is_disposed());
    }
}
