mod config;
mod presync;
mod session_client;
mod state_machine;
mod tunnel;
mod uploader;
mod watcher;
mod workload;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use peerhost_common::process::ProcessTracker;

use crate::config::PeerSettings;
use crate::session_client::SessionClient;
use crate::state_machine::StateMachine;

#[derive(Parser, Debug)]
#[command(name = "peer", about = "PeerHost peer: hosts the workload while holding the world lease")]
struct Cli {
    /// Path to the peer's JSON settings file.
    #[arg(long, default_value = "settings.json")]
    settings: PathBuf,

    /// Path to the cloudflared (or equivalent) tunnel binary.
    #[arg(long, default_value = "cloudflared")]
    tunnel_binary: PathBuf,
}

fn cli() -> clap::Command {
    <Cli as clap::CommandFactory>::command()
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = PeerSettings::load(&cli.settings)
        .with_context(|| format!("loading settings from {}", cli.settings.display()))?;

    init_tracing(settings.debug);
    tracing::info!(host_id = %settings.host_id, server_url = %settings.server_url, "peer starting");

    let tracker_path = settings.watch_dir.join("meta").join("processes.json");
    let mut tracker = ProcessTracker::load(tracker_path).await;
    let reclaimed = tracker
        .cleanup_orphans()
        .await
        .context("reclaiming orphaned subprocesses from a prior run")?;
    if !reclaimed.is_empty() {
        tracing::info!(?reclaimed, "reclaimed orphaned subprocesses left by a previous run");
    }
    let tracker = Arc::new(tokio::sync::Mutex::new(tracker));

    let session_client = Arc::new(SessionClient::new(settings.server_url.clone()));
    let shutdown = CancellationToken::new();

    let machine = StateMachine::new(
        settings,
        session_client,
        tracker,
        cli.tunnel_binary,
        shutdown.clone(),
    );
    let mut driver = tokio::spawn(machine.run());

    tokio::select! {
        result = &mut driver => {
            if let Err(e) = result {
                tracing::error!(error = %e, "state machine task panicked");
            } else {
                tracing::warn!("state machine exited unexpectedly");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, relinquishing the lease if held");
            shutdown.cancel();
            if let Err(e) = driver.await {
                tracing::error!(error = %e, "state machine task panicked during shutdown");
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigquit = signal(SignalKind::quit()).expect("install SIGQUIT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
        _ = sigquit.recv() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        cli().debug_assert();
    }
}
