//! Process Tracker (spec §4.8): a small on-disk registry of subprocess PIDs that lets a process
//! reclaim orphans left behind by a prior crashed run.
//!
//! Grounded almost directly on `original_source/client/common/process_tracker.py`: persist
//! `{key -> (pid, expected_executable_name)}`, and on startup kill anything whose PID still
//! exists under that expected name before clearing the tracked set.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProcessRecord {
    pid: u32,
    expected_name: String,
}

/// Persists tracked subprocess PIDs to a JSON document and reclaims orphans on startup.
pub struct ProcessTracker {
    path: PathBuf,
    processes: HashMap<String, ProcessRecord>,
}

impl ProcessTracker {
    /// Loads the tracker state from `path`, tolerating a missing or corrupt file the same way
    /// the source does (reset to empty rather than failing startup).
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let processes = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "process tracker cache corrupted, resetting");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self { path, processes }
    }

    pub fn register(&mut self, key: &str, pid: u32, expected_name: &str) {
        self.processes.insert(
            key.to_string(),
            ProcessRecord {
                pid,
                expected_name: expected_name.to_string(),
            },
        );
    }

    pub fn unregister(&mut self, key: &str) {
        self.processes.remove(key);
    }

    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&self.processes).expect("map serializes");
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }

    /// Kills any tracked PID that still exists under its expected executable name, then clears
    /// the tracked set unconditionally — matching the source's "always clear cache on startup
    /// after cleanup to start fresh".
    pub async fn cleanup_orphans(&mut self) -> Result<Vec<String>> {
        let mut reclaimed = Vec::new();
        for (key, record) in self.processes.iter() {
            if is_orphan(record.pid, &record.expected_name) {
                info!(key, pid = record.pid, "found orphan process, killing tree");
                kill_process_tree(record.pid);
                reclaimed.push(key.clone());
            }
        }
        self.processes.clear();
        self.save().await?;
        Ok(reclaimed)
    }
}

#[cfg(target_os = "linux")]
fn process_exe_name(pid: u32) -> Option<String> {
    let comm_path = format!("/proc/{pid}/comm");
    std::fs::read_to_string(comm_path)
        .ok()
        .map(|s| s.trim().to_string())
}

#[cfg(not(target_os = "linux"))]
fn process_exe_name(_pid: u32) -> Option<String> {
    None
}

fn is_orphan(pid: u32, expected_name: &str) -> bool {
    match process_exe_name(pid) {
        Some(name) => name.to_lowercase().contains(&expected_name.to_lowercase()),
        None => false,
    }
}

#[cfg(target_os = "linux")]
fn child_pids(parent_pid: u32) -> Vec<u32> {
    let mut children = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return children;
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let stat_path = format!("/proc/{pid}/stat");
        let Ok(stat) = std::fs::read_to_string(&stat_path) else {
            continue;
        };
        // Format: pid (comm) state ppid ...; comm may contain spaces/parens, so split after ')'.
        if let Some(idx) = stat.rfind(')') {
            let rest: Vec<&str> = stat[idx + 1..].split_whitespace().collect();
            if rest.len() > 1 {
                if let Ok(ppid) = rest[1].parse::<u32>() {
                    if ppid == parent_pid {
                        children.push(pid);
                    }
                }
            }
        }
    }
    children
}

#[cfg(not(target_os = "linux"))]
fn child_pids(_parent_pid: u32) -> Vec<u32> {
    Vec::new()
}

/// Kills every child of `pid` (as discovered via `/proc`) before killing `pid` itself. Exposed
/// for the Workload Supervisor and Tunnel Client, which both need to force-kill a subprocess that
/// may have forked its own children (spec §4.7/§4.9).
pub fn kill_process_tree(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    for child in child_pids(pid) {
        let _ = kill(Pid::from_raw(child as i32), Signal::SIGKILL);
    }
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

/// Pluggable spawn/kill capability so platform-specific subprocess quirks (console visibility,
/// process groups) live behind one seam instead of scattered `cfg!` checks (spec §9).
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, cmd: tokio::process::Command) -> std::io::Result<tokio::process::Child>;
}

/// The default spawner: runs the command as-is via the tokio runtime.
pub struct DefaultSpawner;

impl ProcessSpawner for DefaultSpawner {
    fn spawn(&self, mut cmd: tokio::process::Command) -> std::io::Result<tokio::process::Child> {
        cmd.spawn()
    }
}

pub fn default_spawner() -> std::sync::Arc<dyn ProcessSpawner> {
    std::sync::Arc::new(DefaultSpawner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_save_round_trips() {
        let dir = tempfile_dir();
        let mut tracker = ProcessTracker::load(dir.join("processes.json")).await;
        tracker.register("workload", 1234, "java");
        tracker.save().await.unwrap();

        let reloaded = ProcessTracker::load(dir.join("processes.json")).await;
        assert_eq!(reloaded.processes.len(), 1);
        assert_eq!(reloaded.processes["workload"].pid, 1234);
    }

    #[tokio::test]
    async fn cleanup_clears_state_even_with_no_orphans() {
        let dir = tempfile_dir();
        let mut tracker = ProcessTracker::load(dir.join("processes.json")).await;
        // a PID that is exceedingly unlikely to exist
        tracker.register("stale", 999_999, "nonexistent-binary");
        tracker.cleanup_orphans().await.unwrap();
        assert!(tracker.processes.is_empty());
    }

    fn tempfile_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("peerhost-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
