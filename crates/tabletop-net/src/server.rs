//! The hosting side: the authoritative table and one remote client node per
//! connected player.
//!
//! # Join handshake
//!
//! A new connection becomes a [`RemoteClientNode`] in state `Started`. Its
//! `Hello` is checked in order: protocol version, password, player name,
//! capacity. A failed check answers `Rejected`, closes the connection and
//! stops the node. On success the node is bound under the requested name,
//! registered with [`ServerNode::bind_remote_node`], and sent `Welcome`
//! followed by the full table state. Only then does gameplay code see it.
//!
//! Name collisions are caught here, before `bind_remote_node`, which treats
//! a duplicate name as an internal error.

use std::sync::{Arc, Weak};

use crossbeam_channel::Receiver;
use tabletop_config::Config;
use tabletop_table::{ComponentPath, Increment, PatchReport, Registries, Table, TableObject};

use crate::error::{ExecutionError, NodeError};
use crate::layer::NodeLayer;
use crate::message::{JoinRejection, NodeMessage, PROTOCOL_VERSION, PlayerInfo};
use crate::node::{Node, NodeEvent, NodeSettings};
use crate::password::SecurePassword;
use crate::remote::{
    RemoteEndpoint, RemoteNode, RemoteNodeController, RemoteNodeState, RemoteTable,
    ServiceContext,
};

// ---------------------------------------------------------------------------
// ServerNode
// ---------------------------------------------------------------------------

/// A node hosting the table for many remote players.
pub struct ServerNode {
    node: Node<RemoteClientNode>,
    max_players: u32,
    this: Weak<ServerNode>,
}

impl ServerNode {
    /// Starts hosting `table` with room for `max_players` players, host
    /// included.
    pub fn new(
        settings: NodeSettings,
        max_players: u32,
        registries: Registries,
        table: Arc<Table>,
    ) -> Result<Arc<Self>, NodeError> {
        let node = Node::new(settings, registries, table)?;
        tracing::info!(
            "`{}` hosting table for up to {max_players} players",
            node.player_name()
        );
        Ok(Arc::new_cyclic(|this| Self {
            node,
            max_players,
            this: this.clone(),
        }))
    }

    /// Starts hosting with the `node` and `server` sections of `config`.
    pub fn from_config(
        config: &Config,
        registries: Registries,
        table: Arc<Table>,
    ) -> Result<Arc<Self>, NodeError> {
        Self::new(
            NodeSettings::from_config(&config.node),
            config.server.max_players,
            registries,
            table,
        )
    }

    /// The shared node state.
    pub fn node(&self) -> &Node<RemoteClientNode> {
        &self.node
    }

    /// The host's player name.
    pub fn player_name(&self) -> &str {
        self.node.player_name()
    }

    /// A copy of the table password. Confined.
    pub fn password(&self) -> Result<SecurePassword, NodeError> {
        self.node.password()
    }

    /// The node layer.
    pub fn layer(&self) -> &NodeLayer {
        self.node.layer()
    }

    /// The authoritative table.
    pub fn table(&self) -> &Arc<Table> {
        self.node.table()
    }

    /// A receiver for this node's events.
    pub fn events(&self) -> Receiver<NodeEvent> {
        self.node.events()
    }

    /// Capacity of the table, host included.
    pub fn max_players(&self) -> u32 {
        self.max_players
    }

    /// Creates and starts the remote client node for a freshly accepted
    /// connection. Confined.
    pub fn accept(
        &self,
        context: Arc<dyn ServiceContext>,
    ) -> Result<Arc<RemoteClientNode>, NodeError> {
        self.node.ensure_live()?;
        let remote = RemoteClientNode::new(self);
        remote.started(context)?;
        Ok(remote)
    }

    /// Registers a bound remote client node. Confined.
    pub fn bind_remote_node(&self, remote: Arc<RemoteClientNode>) -> Result<(), NodeError> {
        if !remote.belongs_to(self) {
            return Err(NodeError::ForeignRemoteNode);
        }
        self.node.bind_remote_node(remote)
    }

    /// Removes a bound remote client node. Confined.
    pub fn unbind_remote_node(&self, remote: &Arc<RemoteClientNode>) -> Result<(), NodeError> {
        if !remote.belongs_to(self) {
            return Err(NodeError::ForeignRemoteNode);
        }
        self.node.unbind_remote_node(remote)
    }

    /// Whether a player named `player_name` is bound. Confined.
    pub fn is_bound(&self, player_name: &str) -> Result<bool, NodeError> {
        self.node.is_bound(player_name)
    }

    /// The host followed by every bound player. Confined.
    pub fn players(&self) -> Result<Vec<PlayerInfo>, NodeError> {
        let mut players = vec![PlayerInfo {
            name: self.player_name().to_string(),
            is_host: true,
        }];
        players.extend(
            self.node
                .bound_player_names()?
                .into_iter()
                .map(|name| PlayerInfo {
                    name,
                    is_host: false,
                }),
        );
        Ok(players)
    }

    /// Applies a local edit and sends it to every bound player.
    ///
    /// Callable from any thread. The patch is applied and its sends are
    /// queued in one node-layer job, so players see host edits and relayed
    /// player edits in the order this node applied them. Off the layer this
    /// blocks until the job has run; the caller must not hold the table lock.
    pub fn publish_increment(
        &self,
        path: ComponentPath,
        increment: Increment,
    ) -> Result<PatchReport, NodeError> {
        let this = self.this.upgrade().ok_or(NodeError::Disposed)?;
        self.layer()
            .sync_exec(move || this.apply_and_fan_out(&path, &increment))?
    }

    /// Applies `edit` to the table and publishes it as tree patches.
    ///
    /// Callable from any thread, under the same rules as
    /// [`ServerNode::publish_increment`]. The table stays locked from the
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
                .map(|(path, increment)| this.apply_and_fan_out(&path, &increment))
                .collect::<Result<Vec<_>, NodeError>>()
        })?
    }

    /// Re-sends the full table state to `player_name`. Confined.
    pub fn resync(&self, player_name: &str) -> Result<(), NodeError> {
        self.node.ensure_live()?;
        let remote = self
            .node
            .bound_remote_node(player_name)?
            .ok_or_else(|| NodeError::NotBound(player_name.to_string()))?;
        remote.table()?.set_table_state(&self.table().create_memento())?;
        tracing::info!("Resynchronised table state of `{player_name}`");
        Ok(())
    }

    /// Says goodbye to every player, stops their nodes, zeroes the password
    /// and disposes the node layer.
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
        match self.node.bound_remote_nodes() {
            Ok(remotes) => {
                for remote in remotes {
                    if let Err(e) = remote.endpoint.send(NodeMessage::Goodbye) {
                        tracing::debug!("Goodbye not delivered: {e}");
                    }
                    remote.endpoint.close();
                    if let Err(e) = remote.stopped() {
                        tracing::warn!("Failed to stop a remote node during dispose: {e}");
                    }
                }
            }
            Err(e) => tracing::warn!("Cannot reach bound players during dispose: {e}"),
        }
        self.node.finish_dispose()
    }

    // --- Inbound ---

    fn check_join(
        &self,
        protocol_version: u32,
        player_name: &str,
        password: &SecurePassword,
    ) -> Result<Option<JoinRejection>, NodeError> {
        if protocol_version != PROTOCOL_VERSION {
            return Ok(Some(JoinRejection::ProtocolMismatch {
                expected: PROTOCOL_VERSION,
                actual: protocol_version,
            }));
        }
        if !self.node.password_matches(password)? {
            return Ok(Some(JoinRejection::BadPassword));
        }
        if player_name.is_empty() {
            return Ok(Some(JoinRejection::InvalidName));
        }
        if player_name == self.player_name() || self.node.is_bound(player_name)? {
            return Ok(Some(JoinRejection::NameTaken(player_name.to_string())));
        }
        let seated = self.node.bound_player_names()?.len().saturating_add(1);
        if u32::try_from(seated).unwrap_or(u32::MAX) >= self.max_players {
            return Ok(Some(JoinRejection::TableFull {
                max_players: self.max_players,
            }));
        }
        Ok(None)
    }

    fn handle_hello(
        &self,
        remote: &Arc<RemoteClientNode>,
        protocol_version: u32,
        player_name: String,
        password: SecurePassword,
    ) -> Result<(), NodeError> {
        self.node.ensure_live()?;
        if remote.state()? != RemoteNodeState::Started {
            tracing::warn!("Ignoring repeated Hello from `{player_name}`");
            return Ok(());
        }

        if let Some(rejection) = self.check_join(protocol_version, &player_name, &password)? {
            tracing::info!("Refused join of `{player_name}`: {rejection}");
            if let Err(e) = remote.endpoint.send(NodeMessage::Rejected(rejection)) {
                tracing::debug!("Rejection not delivered: {e}");
            }
            remote.endpoint.close();
            return remote.stopped();
        }

        remote.bind(&player_name)?;
        self.bind_remote_node(Arc::clone(remote))?;

        let welcome = NodeMessage::Welcome {
            server_player_name: self.player_name().to_string(),
            players: self.players()?,
        };
        let sent = remote.endpoint.send(welcome).and_then(|()| {
            remote
                .endpoint
                .send(NodeMessage::TableState(self.table().create_memento()))
        });
        if let Err(e) = sent {
            tracing::warn!("Lost `{player_name}` during join: {e}");
            remote.endpoint.close();
            return remote.stopped();
        }

        tracing::info!("`{player_name}` joined the table");
        self.node.emit(NodeEvent::PlayerJoined(player_name.clone()));
        self.broadcast_players(Some(&player_name))
    }

    fn handle_increment(
        &self,
        remote: &Arc<RemoteClientNode>,
        path: ComponentPath,
        increment: Increment,
    ) -> Result<(), NodeError> {
        if remote.state()? != RemoteNodeState::Bound {
            tracing::warn!("Ignoring increment from a connection that has not joined");
            return Ok(());
        }
        let sender = remote.player_name()?;
        let report =
            self.node
                .applier()
                .increment_component_state(self.table(), &path, &increment);
        if !report.resolved {
            return Ok(());
        }
        self.fan_out(&path, &increment, Some(sender))?;
        self.node.emit(NodeEvent::TableUpdated);
        Ok(())
    }

    fn remote_stopped(
        &self,
        remote: &Arc<RemoteClientNode>,
        previous: RemoteNodeState,
    ) -> Result<(), NodeError> {
        if previous != RemoteNodeState::Bound {
            tracing::debug!("Connection closed before joining");
            return Ok(());
        }
        self.unbind_remote_node(remote)?;
        let name = remote.player_name()?.to_string();
        tracing::info!("`{name}` left the table");
        self.node.emit(NodeEvent::PlayerLeft(name));
        if self.node.ensure_live().is_ok() {
            self.broadcast_players(None)?;
        }
        Ok(())
    }

    // --- Outbound ---

    /// Applies a local patch, then schedules its sends. Confined.
    fn apply_and_fan_out(
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
            && let Err(e) = self.fan_out(path, increment, None)
        {
            tracing::warn!("Failed to publish increment for {path}: {e}");
        }
        Ok(report)
    }

    /// Schedules one send of the increment per bound player except
    /// `except`. Confined.
    fn fan_out(
        &self,
        path: &ComponentPath,
        increment: &Increment,
        except: Option<&str>,
    ) -> Result<(), NodeError> {
        for remote in self.node.bound_remote_nodes()? {
            let table = remote.table()?;
            if except == Some(table.player_name()) {
                continue;
            }
            let path = path.clone();
            let increment = increment.clone();
            self.layer().async_exec(move || {
                if let Err(e) = table.increment_component_state(&path, &increment) {
                    tracing::warn!(
                        "Failed to forward increment to `{}`: {e}",
                        table.player_name()
                    );
                }
            })?;
        }
        Ok(())
    }

    fn broadcast_players(&self, except: Option<&str>) -> Result<(), NodeError> {
        let players = self.players()?;
        for remote in self.node.bound_remote_nodes()? {
            if except.is_some_and(|name| remote.player_name().is_ok_and(|p| p == name)) {
                continue;
            }
            if let Err(e) = remote.endpoint.send(NodeMessage::Players(players.clone())) {
                tracing::warn!("Player list not delivered: {e}");
            }
        }
        self.node.emit(NodeEvent::PlayersUpdated(players));
        Ok(())
    }
}

impl std::fmt::Debug for ServerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerNode")
            .field("node", &self.node)
            .field("max_players", &self.max_players)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RemoteClientNode
// ---------------------------------------------------------------------------

/// The server-side proxy for one connected player.
pub struct RemoteClientNode {
    endpoint: RemoteEndpoint,
    server: Weak<ServerNode>,
    this: Weak<RemoteClientNode>,
}

impl RemoteClientNode {
    /// Creates a remote client node owned by `server`, in state `Created`.
    pub fn new(server: &ServerNode) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            endpoint: RemoteEndpoint::new(server.layer()),
            server: server.this.clone(),
            this: this.clone(),
        })
    }

    fn belongs_to(&self, server: &ServerNode) -> bool {
        self.server.ptr_eq(&server.this)
    }

    fn owner(&self) -> Result<(Arc<ServerNode>, Arc<Self>), NodeError> {
        let server = self.server.upgrade().ok_or(NodeError::Disposed)?;
        let this = self.this.upgrade().ok_or(NodeError::Disposed)?;
        Ok((server, this))
    }
}

impl RemoteNode for RemoteClientNode {
    fn player_name(&self) -> Result<&str, NodeError> {
        self.endpoint.player_name()
    }

    fn table(&self) -> Result<RemoteTable, NodeError> {
        self.endpoint.table()
    }
}

impl RemoteNodeController for RemoteClientNode {
    fn state(&self) -> Result<RemoteNodeState, NodeError> {
        self.endpoint.state()
    }

    fn started(&self, context: Arc<dyn ServiceContext>) -> Result<(), NodeError> {
        self.endpoint.start(context)?;
        tracing::debug!("Remote client connection started");
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
        let Ok((server, this)) = self.owner() else {
            return Ok(());
        };
        server.remote_stopped(&this, previous)
    }

    fn receive(&self, message: NodeMessage) -> Result<(), NodeError> {
        tracing::trace!("Server received {}", message.kind());
        let (server, this) = self.owner()?;
        match message {
            NodeMessage::Hello {
                protocol_version,
                player_name,
                password,
            } => server.handle_hello(&this, protocol_version, player_name, password),
            NodeMessage::IncrementComponentState { path, increment } => {
                server.handle_increment(&this, path, increment)
            }
            NodeMessage::Goodbye => self.stopped(),
            other => {
                tracing::warn!("Ignoring unexpected {} from a client", other.kind());
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for RemoteClientNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClientNode")
            .field("player_name", &self.endpoint.player_name().ok())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
