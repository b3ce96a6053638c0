//! Core library for the vpnbar agent
//!
//! This crate discovers VPN profiles configured in the operating system,
//! keeps one native session per profile and drives connect/disconnect
//! requests through a single orchestrator with retry and timeout policy.

pub mod error;
pub mod types;

pub mod config;
pub mod native;
pub mod sinks;
pub mod vpn;

/// Initialize logging infrastructure
///
/// Sets up tracing with systemd journal logging when running as a service.
/// Otherwise logs to stderr with pretty formatting, at DEBUG when `verbose`
/// is set and INFO otherwise.
pub fn init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    // Try to use systemd journal logging if available
    #[cfg(target_os = "linux")]
    {
        if std::env::var("JOURNAL_STREAM").is_ok() {
            let journal_layer = tracing_journald::layer()?;
            tracing_subscriber::registry()
                .with(journal_layer)
                .with(level)
                .try_init()?;
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
        .with(level)
        .try_init()?;

    Ok(())
}
