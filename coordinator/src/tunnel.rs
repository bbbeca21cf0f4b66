//! Tunnel Supervisor (spec §4.9): keeps the coordinator's own HTTP surface reachable behind NAT
//! by running a tunnel side-car, tracked under the key `"tunnel_coordinator"` the same way a peer
//! tracks its own subprocesses (spec §4.8).

use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

use peerhost_common::process::{default_spawner, ProcessSpawner, ProcessTracker};
use peerhost_common::Result;

use crate::config::TunnelConfig;

const TRACKER_KEY: &str = "tunnel_coordinator";

pub struct TunnelSupervisor {
    config: TunnelConfig,
    spawner: Arc<dyn ProcessSpawner>,
    tracker: Mutex<ProcessTracker>,
    child: Mutex<Option<tokio::process::Child>>,
}

impl TunnelSupervisor {
    pub async fn new(config: TunnelConfig, tracker_path: std::path::PathBuf) -> Self {
        let tracker = ProcessTracker::load(tracker_path).await;
        Self {
            config,
            spawner: default_spawner(),
            tracker: Mutex::new(tracker),
            child: Mutex::new(None),
        }
    }

    /// Kills any orphaned tunnel process left behind by a prior crashed run before starting a
    /// fresh one.
    pub async fn reclaim_orphans(&self) -> Result<()> {
        let mut tracker = self.tracker.lock().await;
        let reclaimed = tracker.cleanup_orphans().await?;
        if !reclaimed.is_empty() {
            warn!(?reclaimed, "reclaimed orphaned coordinator subprocesses");
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.args(&self.config.args);
        cmd.kill_on_drop(true);

        let child = self.spawner.spawn(cmd)?;
        let pid = child.id().unwrap_or(0);

        let mut tracker = self.tracker.lock().await;
        tracker.register(TRACKER_KEY, pid, "cloudflared");
        tracker.save().await?;
        drop(tracker);

        *self.child.lock().await = Some(child);
        info!(pid, "tunnel supervisor started");
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        let mut tracker = self.tracker.lock().await;
        tracker.unregister(TRACKER_KEY);
        let _ = tracker.save().await;
        info!("tunnel supervisor stopped");
    }
}
