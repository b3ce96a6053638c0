//! VPN connection management commands

use crate::cli::{resolve, status_label, Agent, ProviderKind};
use colored::Colorize;
use std::time::Duration;
use tracing::info;
use vpnbar_core::config::ConnectionPolicy;
use vpnbar_core::error::{VpnBarError, VpnError};
use vpnbar_core::types::ConnectionStatus;
use vpnbar_core::vpn::ManagerState;

/// Print every configured connection
pub async fn run_list(provider: ProviderKind, json: bool) -> Result<(), VpnBarError> {
    let agent = Agent::start(provider)?;
    let result = agent.load().await.and_then(|state| print_list(&state, json));
    agent.shutdown().await;
    result
}

fn print_list(state: &ManagerState, json: bool) -> Result<(), VpnBarError> {
    if json {
        println!("{}", serde_json::to_string_pretty(&state.connections)?);
        return Ok(());
    }

    let width = state
        .connections
        .iter()
        .map(|c| c.name.len())
        .max()
        .unwrap_or(0);

    for connection in &state.connections {
        let marker = if state.last_used_connection_id.as_deref() == Some(connection.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<width$}  {:<13}  {}",
            marker,
            connection.name,
            status_label(connection.status),
            connection.id.dimmed(),
            width = width
        );
    }

    if let Some(error) = &state.loading_error {
        println!("{} {}", "!".yellow(), error);
    }
    Ok(())
}

/// Wait until `id` reaches `target`, an error is recorded, or `limit` passes
async fn settle(
    agent: &Agent,
    id: &str,
    target: ConnectionStatus,
    limit: Duration,
) -> Result<ManagerState, VpnBarError> {
    let waited = tokio::time::timeout(
        limit,
        agent
            .manager
            .wait_for(|s| s.status_of(id) == Some(target) || s.loading_error.is_some()),
    )
    .await;

    let state = match waited {
        Ok(Some(state)) => state,
        Ok(None) => return Err(VpnError::SharedManagerUnavailable.into()),
        Err(_) => agent.manager.state(),
    };

    match &state.loading_error {
        // A forced disconnect still ends disconnected
        Some(error) if error.is_timeout() => {
            println!("{} {}", "!".yellow(), error);
            Ok(state)
        }
        Some(error) => Err(error.clone().into()),
        None => Ok(state),
    }
}

fn report(state: &ManagerState, id: &str) {
    if let Some(connection) = state.connection(id) {
        println!("{}: {}", connection.name.bold(), status_label(connection.status));
    }
}

/// Connect and wait for the tunnel to come up
pub async fn run_connect(
    provider: ProviderKind,
    key: &str,
    retries: Option<u32>,
) -> Result<(), VpnBarError> {
    let agent = Agent::start(provider)?;
    let result = connect(&agent, key, retries).await;
    agent.shutdown().await;
    result
}

async fn connect(agent: &Agent, key: &str, retries: Option<u32>) -> Result<(), VpnBarError> {
    let state = agent.load().await?;
    let id = resolve(&state, key)?.id.clone();
    let policy = agent.settings.policy();
    let attempts = retries.unwrap_or(policy.retry_count).max(1);

    info!("Connecting {}", id);
    agent.manager.connect(&id, attempts)?;
    let limit = connect_limit(&policy, attempts);
    let state = settle(agent, &id, ConnectionStatus::Connected, limit).await?;
    report(&state, &id);
    Ok(())
}

/// Disconnect and wait for confirmation or the timeout guard
pub async fn run_disconnect(provider: ProviderKind, key: &str) -> Result<(), VpnBarError> {
    let agent = Agent::start(provider)?;
    let result = disconnect(&agent, key).await;
    agent.shutdown().await;
    result
}

async fn disconnect(agent: &Agent, key: &str) -> Result<(), VpnBarError> {
    let state = agent.load().await?;
    let id = resolve(&state, key)?.id.clone();

    info!("Disconnecting {}", id);
    agent.manager.disconnect(&id)?;
    let limit = wait_limit(&agent.settings.policy());
    let state = settle(agent, &id, ConnectionStatus::Disconnected, limit).await?;
    report(&state, &id);
    Ok(())
}

/// Toggle `key`, or the last used connection when none is given
pub async fn run_toggle(provider: ProviderKind, key: Option<&str>) -> Result<(), VpnBarError> {
    let agent = Agent::start(provider)?;
    let result = toggle(&agent, key).await;
    agent.shutdown().await;
    result
}

async fn toggle(agent: &Agent, key: Option<&str>) -> Result<(), VpnBarError> {
    let state = agent.load().await?;
    let id = match key {
        Some(key) => resolve(&state, key)?.id.clone(),
        None => state
            .last_used_connection_id
            .clone()
            .ok_or_else(|| VpnError::connection_failed("no connection used yet, pass an id"))?,
    };

    let policy = agent.settings.policy();
    let (target, limit) = match state.status_of(&id) {
        Some(status) if status.is_active() => (ConnectionStatus::Disconnected, wait_limit(&policy)),
        Some(_) => (
            ConnectionStatus::Connected,
            connect_limit(&policy, policy.retry_count.max(1)),
        ),
        None => return Err(VpnError::ConnectionNotFound { id }.into()),
    };

    agent.manager.toggle_connection(&id)?;
    let state = settle(agent, &id, target, limit).await?;
    report(&state, &id);
    Ok(())
}

/// Disconnect every active connection
pub async fn run_disconnect_all(provider: ProviderKind) -> Result<(), VpnBarError> {
    let agent = Agent::start(provider)?;
    let result = disconnect_all(&agent).await;
    agent.shutdown().await;
    result
}

async fn disconnect_all(agent: &Agent) -> Result<(), VpnBarError> {
    let state = agent.load().await?;
    let active: Vec<String> = state.active_connections().map(|c| c.id.clone()).collect();
    if active.is_empty() {
        println!("No active connections");
        return Ok(());
    }

    agent.manager.disconnect_all();
    let waited = tokio::time::timeout(
        wait_limit(&agent.settings.policy()),
        agent.manager.wait_for(|s| all_disconnected(s, &active)),
    )
    .await;
    if waited.is_err() {
        println!("{} some connections are still active", "!".yellow());
    }

    let state = agent.manager.state();
    for id in &active {
        report(&state, id);
    }
    Ok(())
}

/// Time for `attempts` connect attempts including their backoff delays
fn connect_limit(policy: &ConnectionPolicy, attempts: u32) -> Duration {
    (1..=attempts)
        .map(|attempt| policy.retry_delay(attempt) + policy.disconnect_timeout())
        .sum()
}

/// Disconnect timeout plus a margin for the guard to fire
fn wait_limit(policy: &ConnectionPolicy) -> Duration {
    policy.disconnect_timeout() + Duration::from_secs(1)
}

/// Every id in `ids` is disconnected or no longer configured
fn all_disconnected(state: &ManagerState, ids: &[String]) -> bool {
    ids.iter().all(|id| {
        state
            .status_of(id)
            .map_or(true, |status| status == ConnectionStatus::Disconnected)
    })
}
