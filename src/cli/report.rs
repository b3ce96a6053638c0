//! Settings, statistics and history commands
//!
//! These read or write the local stores directly and never start the
//! orchestrator.

use crate::cli::format_duration;
use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use std::time::Duration;
use vpnbar_core::config::toml_config::{get_config_dir, get_config_path};
use vpnbar_core::config::SettingsStore;
use vpnbar_core::error::VpnBarError;
use vpnbar_core::sinks::{ConnectionHistory, HistoryAction, StatisticsRecorder};

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Show or change the reload interval
pub fn run_interval(seconds: Option<u64>) -> Result<(), VpnBarError> {
    let settings = SettingsStore::open(get_config_path()?)?;

    match seconds {
        Some(seconds) => {
            let applied = settings.set_update_interval(Duration::from_secs(seconds));
            if applied.as_secs() != seconds {
                println!(
                    "{} {}s is out of range, using {}s",
                    "!".yellow(),
                    seconds,
                    applied.as_secs()
                );
            }
            println!("Update interval set to {}s", applied.as_secs());
        }
        None => println!("Update interval: {}s", settings.update_interval().as_secs()),
    }
    Ok(())
}

/// Show or change whether transitions are announced
pub fn run_notifications(enabled: Option<bool>) -> Result<(), VpnBarError> {
    let settings = SettingsStore::open(get_config_path()?)?;
    if let Some(enabled) = enabled {
        settings.set_notifications_enabled(enabled);
    }

    let label = if settings.notifications_enabled() {
        "on".green()
    } else {
        "off".dimmed()
    };
    println!("Notifications: {}", label);
    Ok(())
}

/// Print usage statistics, optionally resetting them first
pub fn run_stats(reset: bool) -> Result<(), VpnBarError> {
    let recorder = StatisticsRecorder::open(get_config_dir()?.join(super::STATISTICS_FILE));
    if reset {
        recorder.reset();
        println!("Statistics reset");
        return Ok(());
    }

    let stats = recorder.statistics();
    let never = || "never".dimmed().to_string();

    println!("{}", "Connection statistics".bold());
    println!("  Connections:      {}", stats.total_connections);
    println!("  Disconnections:   {}", stats.total_disconnections);
    println!(
        "  Time connected:   {}",
        format_duration(stats.total_connection_time())
    );
    println!("  Average session:  {}", format_duration(stats.average_session()));
    println!(
        "  Longest session:  {}",
        format_duration(Duration::from_millis(stats.longest_session_ms))
    );
    println!(
        "  Shortest session: {}",
        stats
            .shortest_session_ms
            .map(|ms| format_duration(Duration::from_millis(ms)))
            .unwrap_or_else(never)
    );
    println!(
        "  Last connected:   {}",
        stats.last_connected_at.map(local_time).unwrap_or_else(never)
    );
    println!(
        "  Last disconnected: {}",
        stats.last_disconnected_at.map(local_time).unwrap_or_else(never)
    );
    Ok(())
}

/// Print the newest `limit` history entries, or clear the history
pub fn run_history(limit: usize, clear: bool) -> Result<(), VpnBarError> {
    let history = ConnectionHistory::open(get_config_dir()?.join(super::HISTORY_FILE));
    if clear {
        history.clear();
        println!("History cleared");
        return Ok(());
    }

    let entries = history.entries(limit);
    if entries.is_empty() {
        println!("No connection history");
        return Ok(());
    }

    for entry in entries {
        let action = match entry.action {
            HistoryAction::Connected => entry.action.to_string().green(),
            HistoryAction::Disconnected => entry.action.to_string().red(),
        };
        println!(
            "{}  {:<12}  {}",
            local_time(entry.timestamp),
            action,
            entry.connection_name
        );
    }
    Ok(())
}
