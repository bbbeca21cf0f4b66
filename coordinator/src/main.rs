mod config;
mod content_store;
mod file_record;
mod http;
mod lease;
mod manifest;
mod reaper;
mod state;
mod tunnel;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use peerhost_common::policy::{CompiledPolicy, SyncPolicyDoc};

use crate::config::CoordinatorConfig;
use crate::content_store::ContentStore;
use crate::file_record::FileRecordIndex;
use crate::lease::LeaseManager;
use crate::manifest::ManifestService;
use crate::state::AppState;
use crate::tunnel::TunnelSupervisor;

#[derive(Parser, Debug)]
#[command(name = "coordinator", about = "World coordinator: lease arbitration, file storage, manifest service")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "coordinator.toml")]
    config: PathBuf,
}

fn cli() -> clap::Command {
    <Cli as clap::CommandFactory>::command()
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

async fn load_policy(config: &CoordinatorConfig) -> anyhow::Result<SyncPolicyDoc> {
    let path = config.policy_path();
    match tokio::fs::read_to_string(&path).await {
        Ok(raw) => toml::from_str(&raw).with_context(|| format!("parsing policy file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "policy file missing, writing defaults");
            let doc = SyncPolicyDoc::default();
            let serialized = toml::to_string_pretty(&doc)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, serialized).await?;
            Ok(doc)
        }
        Err(e) => Err(e).with_context(|| format!("reading policy file {}", path.display())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = CoordinatorConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let policy_doc = load_policy(&config).await?;
    let policy = CompiledPolicy::compile(&policy_doc);

    let lease_manager = LeaseManager::load(
        config.session_path(),
        config.hmac_secret.as_bytes(),
        config.lock_timeout,
        config.heartbeat_interval,
    )
    .await;
    let content_store = ContentStore::new(config.world_root.clone());
    let manifest_service = ManifestService::new(config.world_root.clone());
    let file_records = FileRecordIndex::load(config.file_records_path()).await;

    let state = Arc::new(AppState {
        lease_manager,
        content_store,
        manifest_service,
        file_records,
        policy_doc,
        policy,
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let reaper_state = state.clone();
    let reaper_period = config.heartbeat_interval;
    let reaper_shutdown = shutdown_rx.clone();
    let reaper_handle = tokio::spawn(async move {
        reaper::run(reaper_state, reaper_period, reaper_shutdown).await;
    });

    let tunnel_supervisor = if let Some(tunnel_config) = config.tunnel.clone() {
        let supervisor = TunnelSupervisor::new(tunnel_config, config.state_dir.join("processes.json")).await;
        supervisor.reclaim_orphans().await?;
        supervisor.start().await?;
        Some(Arc::new(supervisor))
    } else {
        None
    };

    let router = http::make_router(state.clone());
    let listen_addr: SocketAddr = config.listen_addr;
    tracing::info!(%listen_addr, "coordinator listening");

    let server = axum::Server::bind(&listen_addr)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => {
            result.context("http server exited")?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = reaper_handle.await;
    if let Some(supervisor) = tunnel_supervisor {
        supervisor.stop().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
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
