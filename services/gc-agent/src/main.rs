//! imagegc Agent
//!
//! Tracks when each local container image was last used and removes
//! images that are dangling, or unreferenced and unused for longer than
//! the configured retention window.
//!
//! ## Architecture
//!
//! - **Bootstrap**: Reconciles persisted usage with the daemon's containers and images
//! - **Event Ingestor**: Records image use whenever a container is destroyed
//! - **Sweep Scheduler**: Runs the collector periodically
//! - **Runtime**: Docker Engine API over the daemon's Unix socket

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use imagegc_agent::{Args, DockerClient, GcAgent, LogFormat};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let default_level = if args.debug { "debug" } else { "info" };
    let (json, text) = match args.log_format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(json)
        .with(text)
        .init();

    let once = args.once;
    let config = args.into_config().context("invalid configuration")?;
    info!(
        db = ?config.db_path,
        docker_socket = %config.docker_socket.display(),
        "Starting imagegc agent"
    );

    let docker = DockerClient::new(&config.docker_socket);
    docker.ping().await.with_context(|| {
        format!(
            "cannot reach Docker daemon at {}",
            config.docker_socket.display()
        )
    })?;

    let agent = GcAgent::open(Arc::new(docker), config);

    if once {
        agent.bootstrap().await;
        let report = agent.collect().await;
        info!(removed = report.removed(), "Single sweep finished");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    agent.start(shutdown_rx).await;

    info!("imagegc agent shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
