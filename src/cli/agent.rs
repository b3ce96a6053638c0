//! Long-running agent mode
//!
//! Keeps the orchestrator alive, reloading on the configured interval and
//! printing every status change until interrupted.

use crate::cli::{status_label, Agent, ProviderKind};
use colored::Colorize;
use std::collections::HashMap;
use tracing::{info, warn};
use vpnbar_core::error::VpnBarError;
use vpnbar_core::types::ConnectionStatus;
use vpnbar_core::vpn::ManagerState;

/// Run until Ctrl-C
pub async fn run_agent(provider: ProviderKind) -> Result<(), VpnBarError> {
    let agent = Agent::start(provider)?;
    let mut state_rx = agent.manager.subscribe();
    let mut seen = HashMap::new();
    let mut last_error = None;

    info!(
        "Agent started, reloading every {}s",
        agent.manager.update_interval().as_secs()
    );
    agent.manager.load_connections(true);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for interrupt: {}", e);
                }
                info!("Interrupted, shutting down");
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    warn!("Orchestrator stopped unexpectedly");
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                print_changes(&state, &mut seen, &mut last_error);
            }
        }
    }

    agent.shutdown().await;
    Ok(())
}

fn print_changes(
    state: &ManagerState,
    seen: &mut HashMap<String, ConnectionStatus>,
    last_error: &mut Option<String>,
) {
    for connection in &state.connections {
        if seen.get(&connection.id) != Some(&connection.status) {
            println!("{}: {}", connection.name.bold(), status_label(connection.status));
            seen.insert(connection.id.clone(), connection.status);
        }
    }
    seen.retain(|id, _| state.connection(id).is_some());

    let error = state.loading_error.as_ref().map(ToString::to_string);
    if error != *last_error {
        if let Some(message) = &error {
            println!("{} {}", "!".yellow(), message);
        }
        *last_error = error;
    }
}
