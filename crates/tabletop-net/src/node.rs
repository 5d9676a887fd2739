//! The local protocol endpoint shared by servers and clients.
//!
//! A [`Node`] owns the local player's identity, the canonical password,
//! the node layer, and the set of bound remote nodes. Everything mutable
//! lives in [`Confined`] cells on the node layer; the table content is
//! separately guarded by the table's own lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tabletop_config::NodeConfig;
use tabletop_table::{
    ComponentPath, Increment, PatchApplier, Registries, Table, TableObject, diff,
};

use crate::error::NodeError;
use crate::layer::{Confined, NodeLayer};
use crate::message::PlayerInfo;
use crate::password::SecurePassword;
use crate::remote::RemoteNode;

/// What a node is built from.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Name of the local player. Must be non-empty.
    pub player_name: String,
    /// Table password: checked by hosts, presented by clients.
    pub password: SecurePassword,
    /// Name of the node-layer worker thread.
    pub layer_thread_name: String,
}

impl NodeSettings {
    /// Settings for `player_name` with an empty password.
    pub fn new(player_name: impl Into<String>) -> Self {
        let player_name = player_name.into();
        Self {
            layer_thread_name: format!("node-layer-{player_name}"),
            player_name,
            password: SecurePassword::empty(),
        }
    }

    /// Builder-style password assignment.
    pub fn with_password(mut self, password: SecurePassword) -> Self {
        self.password = password;
        self
    }

    /// Settings from the `node` section of the configuration.
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            player_name: config.player_name.clone(),
            password: SecurePassword::new(&config.password),
            layer_thread_name: config.layer_thread_name.clone(),
        }
    }
}

/// Notifications for gameplay and UI code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A player joined the table (server side).
    PlayerJoined(String),
    /// A player left the table (server side).
    PlayerLeft(String),
    /// The player list changed.
    PlayersUpdated(Vec<PlayerInfo>),
    /// The join handshake succeeded (client side).
    Connected {
        /// The host's player name.
        server_player_name: String,
    },
    /// The connection to the server ended or was refused (client side).
    Disconnected {
        /// Human-readable reason.
        reason: String,
    },
    /// The local table changed because of a remote patch or state.
    TableUpdated,
}

/// Identity, credentials and bound remote nodes of one local endpoint.
pub struct Node<R> {
    player_name: String,
    layer: NodeLayer,
    table: Arc<Table>,
    applier: PatchApplier,
    events_tx: Sender<NodeEvent>,
    events_rx: Receiver<NodeEvent>,
    password: Confined<SecurePassword>,
    bound: Confined<BTreeMap<String, Arc<R>>>,
    disposed: Confined<bool>,
}

impl<R: RemoteNode + 'static> Node<R> {
    pub(crate) fn new(
        settings: NodeSettings,
        registries: Registries,
        table: Arc<Table>,
    ) -> Result<Self, NodeError> {
        if settings.player_name.is_empty() {
            return Err(NodeError::EmptyPlayerName);
        }
        let layer = NodeLayer::new(settings.layer_thread_name.as_str())?;
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            password: Confined::new(&layer, settings.password),
            bound: Confined::new(&layer, BTreeMap::new()),
            disposed: Confined::new(&layer, false),
            player_name: settings.player_name,
            layer,
            table,
            applier: PatchApplier::new(registries),
            events_tx,
            events_rx,
        })
    }

    /// The local player's name.
    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    /// A copy of the password. Confined.
    pub fn password(&self) -> Result<SecurePassword, NodeError> {
        Ok(self.password.get()?.copy())
    }

    /// Replaces the password, zeroing the old one. Confined.
    pub fn set_password(&self, password: SecurePassword) -> Result<(), NodeError> {
        let mut canonical = self.password.get()?;
        canonical.dispose();
        *canonical = password;
        Ok(())
    }

    pub(crate) fn password_matches(&self, candidate: &SecurePassword) -> Result<bool, NodeError> {
        Ok(*self.password.get()? == *candidate)
    }

    /// The node layer confining this node's state.
    pub fn layer(&self) -> &NodeLayer {
        &self.layer
    }

    /// The local copy of the shared table.
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// The applier used for inbound patches.
    pub fn applier(&self) -> &PatchApplier {
        &self.applier
    }

    /// A receiver for this node's events. All receivers share one queue.
    pub fn events(&self) -> Receiver<NodeEvent> {
        self.events_rx.clone()
    }

    /// Runs `edit` on a copy of the tabletop and returns the patches that
    /// turn the live tabletop into the edited copy, parents first. The live
    /// table is left untouched.
    pub fn diff_edit(
        &self,
        edit: impl FnOnce(&mut TableObject),
    ) -> Vec<(ComponentPath, Increment)> {
        let lock = self.table.lock();
        let before = lock.tabletop().clone();
        let mut after = before.clone();
        edit(&mut after);
        diff::tree_increments(&ComponentPath::root(), &before, &after)
    }

    pub(crate) fn emit(&self, event: NodeEvent) {
        tracing::trace!("`{}` emits {event:?}", self.player_name);
        // The node holds a receiver itself, so the channel never disconnects.
        let _ = self.events_tx.send(event);
    }

    /// Registers `remote` under its player name. Confined.
    ///
    /// Fails with [`NodeError::AlreadyBound`] if the name is taken and with
    /// [`NodeError::UnnamedRemoteNode`] if `remote` has no name yet.
    pub fn bind_remote_node(&self, remote: Arc<R>) -> Result<(), NodeError> {
        let mut bound = self.bound.get()?;
        let name = remote
            .player_name()
            .map_err(|_| NodeError::UnnamedRemoteNode)?
            .to_string();
        if bound.contains_key(&name) {
            return Err(NodeError::AlreadyBound(name));
        }
        bound.insert(name.clone(), remote);
        tracing::info!("`{}` bound remote node `{name}`", self.player_name);
        Ok(())
    }

    /// Removes `remote`, which must be the object bound under its name.
    /// Confined.
    pub fn unbind_remote_node(&self, remote: &Arc<R>) -> Result<(), NodeError> {
        let mut bound = self.bound.get()?;
        let name = remote
            .player_name()
            .map_err(|_| NodeError::UnnamedRemoteNode)?;
        let is_this_remote = bound
            .get(name)
            .is_some_and(|existing| Arc::ptr_eq(existing, remote));
        if !is_this_remote {
            return Err(NodeError::NotBound(name.to_string()));
        }
        bound.remove(name);
        tracing::info!("`{}` unbound remote node `{name}`", self.player_name);
        Ok(())
    }

    /// Whether a remote node is bound under `player_name`. Confined.
    pub fn is_bound(&self, player_name: &str) -> Result<bool, NodeError> {
        Ok(self.bound.get()?.contains_key(player_name))
    }

    /// Names of the bound remote nodes, sorted. Confined.
    pub fn bound_player_names(&self) -> Result<Vec<String>, NodeError> {
        Ok(self.bound.get()?.keys().cloned().collect())
    }

    /// The remote node bound under `player_name`. Confined.
    pub fn bound_remote_node(&self, player_name: &str) -> Result<Option<Arc<R>>, NodeError> {
        Ok(self.bound.get()?.get(player_name).cloned())
    }

    /// All bound remote nodes, in name order. Confined.
    pub fn bound_remote_nodes(&self) -> Result<Vec<Arc<R>>, NodeError> {
        Ok(self.bound.get()?.values().cloned().collect())
    }

    /// The bound remote nodes through their narrow facet. Confined.
    pub fn remote_nodes(&self) -> Result<Vec<Arc<dyn RemoteNode>>, NodeError> {
        Ok(self
            .bound
            .get()?
            .values()
            .map(|remote| Arc::clone(remote) as Arc<dyn RemoteNode>)
            .collect())
    }

    /// Fails with [`NodeError::Disposed`] once disposal has begun. Confined.
    pub(crate) fn ensure_live(&self) -> Result<(), NodeError> {
        if *self.disposed.get()? {
            return Err(NodeError::Disposed);
        }
        Ok(())
    }

    /// Marks the node disposed. Returns `false` if it already was. Confined.
    pub(crate) fn begin_dispose(&self) -> Result<bool, NodeError> {
        let mut disposed = self.disposed.get()?;
        if *disposed {
            return Ok(false);
        }
        *disposed = true;
        Ok(true)
    }

    /// Zeroes the password and disposes the layer. Confined.
    pub(crate) fn finish_dispose(&self) -> Result<(), NodeError> {
        self.password.get()?.dispose();
        self.layer.dispose();
        tracing::info!("Node `{}` disposed", self.player_name);
        Ok(())
    }
}

impl<R> std::fmt::Debug for Node<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("player_name", &self.player_name)
            .field("layer", &self.layer)
            .finish_non_exhaustive()
    }
}
