//! Workload Supervisor (spec §4.7): spawns the game server subprocess, detects "ready"/"saved"
//! log markers, and runs the graceful-stop sequence. Grounded on
//! `original_source/client/services/game_server.py` and the teacher's `compute_ctl.rs`
//! spawn-log-thread-join-on-exit shape.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use peerhost_common::process::{default_spawner, kill_process_tree, ProcessSpawner, ProcessTracker};
use peerhost_common::Result;

const READY_TIMEOUT: Duration = Duration::from_secs(60);
const SAVE_TIMEOUT: Duration = Duration::from_secs(15);
const EXIT_TIMEOUT: Duration = Duration::from_secs(15);
const TRACKER_KEY: &str = "workload";

/// Isolates the exact marker strings behind a trait so a future workload version's log format
/// can be swapped without touching the supervisor's control flow (spec §4.7 supplement, §9).
pub trait LogMarkers: Send + Sync {
    fn is_ready(&self, line: &str) -> bool;
    fn is_saved(&self, line: &str) -> bool;
}

pub struct DefaultMarkers;

impl LogMarkers for DefaultMarkers {
    fn is_ready(&self, line: &str) -> bool {
        line.contains("Done") && line.contains("For help, type")
    }

    fn is_saved(&self, line: &str) -> bool {
        line.contains("Saved the game") || line.contains("dimensions saved")
    }
}

pub struct WorkloadSupervisor {
    world_root: PathBuf,
    start_command: String,
    markers: Arc<dyn LogMarkers>,
    spawner: Arc<dyn ProcessSpawner>,
    tracker: Arc<Mutex<ProcessTracker>>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<tokio::process::ChildStdin>>,
    ready_rx: Mutex<Option<watch::Receiver<bool>>>,
    saved_rx: Mutex<Option<watch::Receiver<bool>>>,
}

impl WorkloadSupervisor {
    pub fn new(
        world_root: PathBuf,
        start_command: String,
        tracker: Arc<Mutex<ProcessTracker>>,
    ) -> Self {
        Self {
            world_root,
            start_command,
            markers: Arc::new(DefaultMarkers),
            spawner: default_spawner(),
            tracker,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            ready_rx: Mutex::new(None),
            saved_rx: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut parts = self.start_command.split_whitespace();
        let program = parts.next().unwrap_or("java");
        let mut cmd = Command::new(program);
        cmd.args(parts)
            .current_dir(&self.world_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = self.spawner.spawn(cmd)?;
        let pid = child.id().unwrap_or(0);

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let (ready_tx, ready_rx) = watch::channel(false);
        let (saved_tx, saved_rx) = watch::channel(false);

        spawn_log_reader(stdout, self.markers.clone(), ready_tx.clone(), saved_tx.clone());
        spawn_log_reader(stderr, self.markers.clone(), ready_tx, saved_tx);

        {
            let mut tracker = self.tracker.lock().await;
            tracker.register(TRACKER_KEY, pid, program);
            tracker.save().await?;
        }

        *self.child.lock().await = Some(child);
        *self.stdin.lock().await = stdin;
        *self.ready_rx.lock().await = Some(ready_rx);
        *self.saved_rx.lock().await = Some(saved_rx);

        info!(pid, "workload started");
        Ok(())
    }

    pub async fn wait_until_ready(&self) -> bool {
        let Some(mut rx) = self.ready_rx.lock().await.clone() else {
            return false;
        };
        tokio::time::timeout(READY_TIMEOUT, async {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .is_ok()
    }

    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        match child.as_mut() {
            Some(c) => c.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    /// Graceful-stop sequence step 2 of spec §4.6: stdin "stop", await "saved", await exit,
    /// escalate to kill-tree on timeout.
    pub async fn stop_gracefully(&self) {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.write_all(b"stop\n").await;
        }

        if let Some(mut rx) = self.saved_rx.lock().await.clone() {
            let saved = tokio::time::timeout(SAVE_TIMEOUT, async {
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .is_ok();
            if !saved {
                warn!("timed out waiting for world-saved marker");
            }
        }

        let exited = if let Some(child) = self.child.lock().await.as_mut() {
            tokio::time::timeout(EXIT_TIMEOUT, child.wait()).await.is_ok()
        } else {
            true
        };

        if !exited {
            warn!("workload did not exit in time, killing process tree");
            if let Some(mut child) = self.child.lock().await.take() {
                if let Some(pid) = child.id() {
                    kill_process_tree(pid);
                }
                let _ = child.wait().await;
            }
        } else {
            self.child.lock().await.take();
        }

        let mut tracker = self.tracker.lock().await;
        tracker.unregister(TRACKER_KEY);
        let _ = tracker.save().await;
    }
}

fn spawn_log_reader(
    stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    markers: Arc<dyn LogMarkers>,
    ready_tx: watch::Sender<bool>,
    saved_tx: watch::Sender<bool>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if markers.is_ready(&line) {
                        let _ = ready_tx.send(true);
                    }
                    if markers.is_saved(&line) {
                        let _ = saved_tx.send(true);
                        let _ = saved_tx.send(false);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "workload log reader failed");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_markers_detect_ready_and_saved() {
        let markers = DefaultMarkers;
        assert!(markers.is_ready("[Server] Done (5.2s)! For help, type \"help\""));
        assert!(!markers.is_ready("starting up..."));
        assert!(markers.is_saved("Saved the game"));
    }
}
