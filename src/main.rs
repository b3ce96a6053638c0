//! vpnbar - VPN connection agent
//!
//! Lists the VPN profiles configured in the system and connects,
//! disconnects or toggles them with retries and timeouts.

use clap::{Parser, Subcommand, ValueEnum};
use cli::ProviderKind;
use vpnbar_core::error::{VpnBarError, VpnError};
use vpnbar_core::init_logging;

mod cli;

#[derive(Parser)]
#[command(name = "vpnbar")]
#[command(about = "Manage system VPN connections with retries and status tracking")]
struct Cli {
    /// Native session provider
    #[arg(long, global = true, value_enum, default_value = "networkmanager")]
    provider: ProviderKind,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep running, reloading and reporting status changes
    Run,
    /// List configured VPN connections
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Connect to a VPN by id or name
    Connect {
        connection: String,
        /// Attempts before giving up (defaults to the configured retry count)
        #[arg(long)]
        retries: Option<u32>,
    },
    /// Disconnect a VPN by id or name
    Disconnect { connection: String },
    /// Toggle a VPN, or the last used one
    Toggle { connection: Option<String> },
    /// Disconnect every active VPN
    DisconnectAll,
    /// Show or set the reload interval in seconds
    Interval { seconds: Option<u64> },
    /// Show or switch connect/disconnect notifications
    Notifications {
        #[arg(value_enum)]
        state: Option<Switch>,
    },
    /// Show connection statistics
    Stats {
        /// Reset the statistics
        #[arg(long)]
        reset: bool,
    },
    /// Show connection history
    History {
        /// Number of entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Clear the history
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

fn exit_code(error: &VpnBarError) -> i32 {
    match error {
        // Configuration errors (exit code 2)
        VpnBarError::Config(_) | VpnBarError::Toml(_) | VpnBarError::TomlSerialize(_) => 2,
        // Nothing to manage, or no framework to manage it with
        VpnBarError::Vpn(
            VpnError::NoConfigurations
            | VpnError::FrameworkLoadFailed { .. }
            | VpnError::SharedManagerUnavailable,
        ) => 2,
        VpnBarError::Vpn(_) | VpnBarError::Io(_) | VpnBarError::Json(_) => 1,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let provider = cli.provider;
    let result = match cli.command {
        Commands::Run => cli::agent::run_agent(provider).await,
        Commands::List { json } => cli::vpn::run_list(provider, json).await,
        Commands::Connect {
            connection,
            retries,
        } => cli::vpn::run_connect(provider, &connection, retries).await,
        Commands::Disconnect { connection } => cli::vpn::run_disconnect(provider, &connection).await,
        Commands::Toggle { connection } => {
            cli::vpn::run_toggle(provider, connection.as_deref()).await
        }
        Commands::DisconnectAll => cli::vpn::run_disconnect_all(provider).await,
        Commands::Interval { seconds } => cli::report::run_interval(seconds),
        Commands::Notifications { state } => {
            cli::report::run_notifications(state.map(|s| matches!(s, Switch::On)))
        }
        Commands::Stats { reset } => cli::report::run_stats(reset),
        Commands::History { limit, clear } => cli::report::run_history(limit, clear),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(exit_code(&e));
        }
    }
}
