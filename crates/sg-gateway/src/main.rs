//! shellgate daemon
//!
//! Accepts SSH connections and attaches each authenticated session to a
//! pseudo-terminal running the command configured for the user.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sg_core::config::{self, GatewayConfig};
use sg_gateway::server::{load_host_key, GatewayServer};
use sg_gateway::GatewayState;

#[derive(Parser)]
#[command(name = "shellgate")]
#[command(about = "SSH gateway attaching sessions to a pseudo-terminal command")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Host key path (overrides config)
    #[arg(long)]
    host_key: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("shellgate starting...");

    let mut config = load(args.config.as_ref())?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(host_key) = args.host_key {
        config.host_key_path = host_key;
    }

    let host_key = load_host_key(&config.host_key_path)?;
    match host_key.clone_public_key() {
        Ok(public) => tracing::info!("Host key {} {}", public.name(), public.fingerprint()),
        Err(e) => tracing::warn!("Could not derive host public key: {}", e),
    }

    let bind_addr = config.bind_address.clone();
    let state = Arc::new(GatewayState::from_config(config).context("Invalid configuration")?);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let server = GatewayServer::new(host_key, Arc::clone(&state), cancel);
    server.run(&bind_addr).await?;

    tracing::info!(
        "shellgate shutdown complete ({} sessions still open)",
        state.active_sessions()
    );
    Ok(())
}

/// Load the named config file, or the default one if it exists
fn load(path: Option<&PathBuf>) -> Result<GatewayConfig> {
    if let Some(path) = path {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            GatewayConfig::default()
        }))
    } else {
        tracing::info!("Using default configuration");
        Ok(GatewayConfig::default())
    }
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }

    cancel.cancel();
}
