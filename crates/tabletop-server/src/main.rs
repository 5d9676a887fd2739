//! Hosts a shared card table and seats a local guest over the loopback
//! transport.

mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tabletop_config::{CliArgs, Config, default_config_dir};
use tabletop_net::{
    ClientNode, NodeError, NodeEvent, NodeSettings, SecurePassword, ServerNode, loopback,
};
use tabletop_table::Table;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    let args = CliArgs::parse();

    let Some(config_dir) = args.config.clone().or_else(default_config_dir) else {
        eprintln!("No config directory available; pass --config");
        std::process::exit(1);
    };
    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_dir.display());
            std::process::exit(1);
        }
    };
    config.apply_cli_overrides(&args);

    tabletop_log::init_logging(
        Some(&log_dir(&config_dir)),
        cfg!(debug_assertions),
        Some(&config),
    );
    tracing::info!("Config loaded from {}", config_dir.display());

    if let Err(e) = run(&config) {
        tracing::error!("Table session failed: {e}");
        std::process::exit(1);
    }
}

fn log_dir(config_dir: &std::path::Path) -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("tabletop").join("logs"))
        .unwrap_or_else(|| config_dir.join("logs"))
}

fn run(config: &Config) -> Result<(), NodeError> {
    let registries = demo::registries();
    let server = ServerNode::from_config(
        config,
        registries.clone(),
        Arc::new(Table::new(demo::tabletop())),
    )?;

    let guest_settings = NodeSettings::new(format!("{}-guest", config.node.player_name))
        .with_password(SecurePassword::new(&config.node.password));
    let guest = ClientNode::new(
        guest_settings,
        registries,
        Arc::new(Table::new(demo::empty_tabletop())),
    )?;
    let guest_events = guest.events();

    let _session = loopback::connect(&server, &guest)?;
    let joined = wait_for(&guest_events, |event| {
        matches!(
            event,
            NodeEvent::TableUpdated | NodeEvent::Disconnected { .. }
        )
    });
    match joined {
        Some(NodeEvent::TableUpdated) => tracing::info!("`{}` is seated", guest.player_name()),
        Some(NodeEvent::Disconnected { reason }) => {
            tracing::error!("Guest was refused: {reason}");
            return shutdown(&server, &guest);
        }
        _ => {
            tracing::error!("Guest did not join within {JOIN_TIMEOUT:?}");
            return shutdown(&server, &guest);
        }
    }

    let reports = server.publish_edit(demo::flip_top_card)?;
    tracing::info!("Flipped the top card with {} patch(es)", reports.len());

    if wait_for(&guest_events, |event| *event == NodeEvent::TableUpdated).is_some() {
        let in_sync = guest.table().create_memento() == server.table().create_memento();
        tracing::info!("Guest table in sync with host: {in_sync}");
    } else {
        tracing::warn!("Guest did not see the flip within {JOIN_TIMEOUT:?}");
    }

    shutdown(&server, &guest)
}

fn shutdown(server: &ServerNode, guest: &ClientNode) -> Result<(), NodeError> {
    guest.dispose()?;
    server.dispose()?;
    tracing::info!("Table closed");
    Ok(())
}

/// Waits for the first event matching `predicate`, giving up after
/// [`JOIN_TIMEOUT`].
fn wait_for(
    events: &Receiver<NodeEvent>,
    predicate: impl Fn(&NodeEvent) -> bool,
) -> Option<NodeEvent> {
    let deadline = Instant::now() + JOIN_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) if predicate(&event) => return Some(event),
            Ok(event) => tracing::debug!("Guest event: {event:?}"),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
        }
    }
}
