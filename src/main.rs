//! # procd
//!
//! Local process supervision core. Launches, monitors, and tears down
//! long-lived dev-server and shell sessions, exposed over a JSON-RPC
//! protocol on stdio.
//!
//! ## Subcommands
//!
//! - `procd serve` (default) — run the JSON-RPC loop over stdio
//! - `procd supervise` — run as supervisor: starts `serve` and restarts it on crash

mod supervisor;

use clap::{Parser, Subcommand};
use tokio::time::Duration;
use tracing::info;

use procd::config::Config;
use procd::coordinator::Coordinator;
use procd::rpc;

/// Local process supervision core.
#[derive(Parser)]
#[command(name = "procd", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the JSON-RPC loop over stdio (default when no subcommand given).
    Serve {
        #[arg(long)]
        config: Option<String>,
    },
    /// Run as supervisor: starts `procd serve` and restarts it on crash.
    Supervise {
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Supervise { config }) => run_supervisor_mode(config.as_deref()).await,
        Some(Commands::Serve { config }) => run_server(config.as_deref()).await,
        None => run_server(None).await,
    }
}

async fn run_supervisor_mode(config_path: Option<&str>) -> ! {
    let config = Config::load(config_path);
    init_tracing(&config.logging.level);
    info!("procd supervisor starting");
    supervisor::run_supervisor(config_path, &config.supervisor).await
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);
    init_tracing(&config.logging.level);

    info!("procd v{} starting", env!("CARGO_PKG_VERSION"));
    info!("data dir: {}", config.core.data_dir);

    let coordinator = Coordinator::new(
        config.core.data_dir.clone(),
        config.core.log_buffer_capacity,
        config.ports.range_start,
        config.ports.range_end,
        config.ports.scan_extra.clone(),
        Duration::from_secs(config.core.graceful_grace_secs),
        Duration::from_secs(config.core.registry_cleanup_grace_secs),
    );
    coordinator.start().expect("start exit monitor");

    let shutdown_coordinator = coordinator.clone();
    let shutdown = async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT");
        }
    };

    tokio::select! {
        _ = rpc::run_stdio(coordinator) => {
            info!("stdin closed, shutting down");
        }
        _ = shutdown => {
            info!("shutdown signal received");
        }
    }

    shutdown_coordinator.cleanup_all().await;
    info!("goodbye");
}

fn init_tracing(level: &str) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
