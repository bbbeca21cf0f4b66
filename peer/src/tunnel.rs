//! Tunnel Client (spec §4.9): host-mode (ingress) and participant-mode (egress) subprocess
//! wrapper, mutually exclusive but not mutually enforced here — orchestration lives in the State
//! Machine. Grounded on `original_source/client/services/cloudflare_service.py`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

use peerhost_common::process::{default_spawner, ProcessSpawner, ProcessTracker};
use peerhost_common::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelMode {
    Host,
    Participant,
}

impl TunnelMode {
    fn tracker_key(self) -> &'static str {
        match self {
            TunnelMode::Host => "tunnel_host",
            TunnelMode::Participant => "tunnel_access",
        }
    }
}

pub struct TunnelClient {
    binary_path: PathBuf,
    spawner: Arc<dyn ProcessSpawner>,
    tracker: Arc<Mutex<ProcessTracker>>,
    child: Mutex<Option<(TunnelMode, tokio::process::Child)>>,
}

impl TunnelClient {
    pub fn new(binary_path: PathBuf, tracker: Arc<Mutex<ProcessTracker>>) -> Self {
        Self {
            binary_path,
            spawner: default_spawner(),
            tracker,
            child: Mutex::new(None),
        }
    }

    pub async fn start(&self, mode: TunnelMode, args: &[String]) -> Result<()> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.args(args);
        cmd.kill_on_drop(true);

        let child = self.spawner.spawn(cmd)?;
        let pid = child.id().unwrap_or(0);

        {
            let mut tracker = self.tracker.lock().await;
            tracker.register(mode.tracker_key(), pid, "cloudflared");
            tracker.save().await?;
        }

        *self.child.lock().await = Some((mode, child));
        info!(?mode, pid, "tunnel client started");
        Ok(())
    }

    pub async fn stop(&self) {
        let Some((mode, mut child)) = self.child.lock().await.take() else {
            return;
        };
        let _ = child.start_kill();
        let _ = child.wait().await;

        let mut tracker = self.tracker.lock().await;
        tracker.unregister(mode.tracker_key());
        if let Err(e) = tracker.save().await {
            warn!(error = %e, "failed to persist process tracker after tunnel stop");
        }
        info!(?mode, "tunnel client stopped");
    }
}
