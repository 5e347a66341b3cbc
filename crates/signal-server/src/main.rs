//! signal-server: WebRTC signaling relay.
//!
//! Accepts WebSocket peers on the configured endpoint paths and forwards
//! their negotiation messages according to the routing mode.

use clap::Parser;
use signal_server::{RoutingMode, ServerConfig, SignalServer};
use std::path::PathBuf;
use tracing::{error, info};

/// signal-server: WebRTC signaling relay
#[derive(Parser, Debug)]
#[command(name = "signal-server", version, about = "WebRTC signaling relay")]
struct Cli {
    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.signal-server/config.toml")]
    config: String,

    /// Routing mode (overrides config)
    #[arg(long, value_enum)]
    mode: Option<RoutingMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting signal-server");

    // Load server config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(
        Some(&config_path),
        cli.port,
        cli.bind.as_deref(),
        cli.mode,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = match SignalServer::new(server_config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    let bound = match server.bind().await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to start listener");
            std::process::exit(1);
        }
    };

    if let Err(e) = bound.run(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
