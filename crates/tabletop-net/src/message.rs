//! Protocol messages exchanged between a server node and its clients.
//!
//! These are the logical messages. Turning them into bytes is the
//! transport's business; every type here derives serde traits so any
//! encoding can be plugged in.

use serde::{Deserialize, Serialize};
use tabletop_table::{ComponentPath, Increment, Memento};

use crate::password::SecurePassword;

/// Version of the logical protocol. Clients announce it in
/// [`NodeMessage::Hello`] and servers reject mismatches.
pub const PROTOCOL_VERSION: u32 = 1;

/// One participant at the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    /// Player name, unique at the table.
    pub name: String,
    /// Whether this player hosts the table.
    pub is_host: bool,
}

/// Why a server refused a join.
///
/// These are ordinary network conditions sent back to the joining client,
/// not programming errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum JoinRejection {
    /// Another player at the table already uses this name.
    #[error("player name `{0}` is already taken")]
    NameTaken(String),

    /// The joining player sent an empty name.
    #[error("player name must not be empty")]
    InvalidName,

    /// The password does not match the table's password.
    #[error("incorrect table password")]
    BadPassword,

    /// The table is at capacity.
    #[error("table is full ({max_players} players)")]
    TableFull {
        /// Capacity of the table, host included.
        max_players: u32,
    },

    /// Client and server speak different protocol versions.
    #[error("protocol version mismatch: server speaks {expected}, client sent {actual}")]
    ProtocolMismatch {
        /// The server's version.
        expected: u32,
        /// The client's version.
        actual: u32,
    },
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeMessage {
    // --- Handshake ---
    /// Client asks to join under `player_name`.
    Hello {
        /// Client protocol version.
        protocol_version: u32,
        /// Requested player name.
        player_name: String,
        /// Table password.
        password: SecurePassword,
    },
    /// Server accepted the join.
    Welcome {
        /// The host's player name. The client binds its server node under it.
        server_player_name: String,
        /// Everyone at the table, the new player included.
        players: Vec<PlayerInfo>,
    },
    /// Server refused the join. The connection closes afterwards.
    Rejected(JoinRejection),

    // --- Table ---
    /// Current player list, sent whenever it changes.
    Players(Vec<PlayerInfo>),
    /// A tree patch for the node at `path`.
    IncrementComponentState {
        /// Path of the patched node from the tabletop root.
        path: ComponentPath,
        /// The changes.
        increment: Increment,
    },
    /// The full table state, as produced by `Table::create_memento`.
    TableState(Memento),

    // --- Teardown ---
    /// The sender is leaving.
    Goodbye,
}

impl NodeMessage {
    /// Short name of the message kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "Hello",
            Self::Welcome { .. } => "Welcome",
            Self::Rejected(_) => "Rejected",
            Self::Players(_) => "Players",
            Self::IncrementComponentState { .. } => "IncrementComponentState",
            Self::TableState(_) => "TableState",
            Self::Goodbye => "Goodbye",
        }
    }
}
