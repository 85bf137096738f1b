//! Remote log server.
//!
//! Run with: remote-logs --config remote-logs.toml
//!
//! Then query e.g. http://127.0.0.1:5000/servers

mod settings;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use remote_logs_engine::LogEngine;
use remote_logs_shell::{LocalConnector, ShellConnector, SshConnector, SshOptions};
use remote_logs_transport::{AppState, router};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "remote-logs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to remote-logs.toml in the user config directory)
    #[arg(long, short, env = "REMOTE_LOGS_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the settings file
    #[arg(long, env = "REMOTE_LOGS_LISTEN", value_name = "ADDR")]
    listen: Option<SocketAddr>,
}

impl Cli {
    fn config_path(&self) -> Result<PathBuf> {
        self.config
            .clone()
            .or_else(settings::default_path)
            .context("No settings file given and no config directory found")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let path = cli.config_path()?;
    let settings = Settings::load(&path)?;
    let registry = settings.registry(|name| std::env::var(name).ok())?;
    tracing::info!(hosts = registry.len(), config = %path.display(), "Loaded settings");

    let connector = ShellConnector::new(
        SshConnector::new(SshOptions {
            connect_timeout: settings.engine.connect_timeout,
            command_timeout: settings.engine.command_timeout,
            known_hosts: settings.known_hosts.clone(),
        }),
        LocalConnector::new(settings.engine.command_timeout),
    );
    if settings.known_hosts.is_none() {
        tracing::warn!("No known_hosts configured; SSH host keys are not verified");
    }

    let addr = cli.listen.unwrap_or(settings.listen);
    let engine = LogEngine::new(registry, Arc::new(connector), settings.engine);
    let shutdown = CancellationToken::new();
    let evictor = engine.spawn_pool_evictor(shutdown.clone());

    let app = router(AppState::new(engine, shutdown.clone()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Some(evictor) = evictor {
        if let Err(e) = evictor.await {
            tracing::warn!("Pool evictor failed: {e}");
        }
    }
    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl-C, then cancel live tails so open streams can finish.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
    shutdown.cancel();
}
