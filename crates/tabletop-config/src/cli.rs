//! Command-line argument parsing for table network nodes.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Tabletop node command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "tabletop", about = "Shared tabletop server")]
pub struct CliArgs {
    /// Local player name.
    #[arg(long)]
    pub player_name: Option<String>,

    /// Table password.
    #[arg(long)]
    pub password: Option<String>,

    /// Maximum number of players, host included.
    #[arg(long)]
    pub max_players: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref name) = args.player_name {
            self.node.player_name = name.clone();
        }
        if let Some(ref password) = args.password {
            self.node.password = password.clone();
        }
        if let Some(max) = args.max_players {
            self.server.max_players = max;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
