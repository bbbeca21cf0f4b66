//! Peer Uploader (spec §4.4): bounded-concurrency upload with retry and auto-revert of forbidden
//! writes. Grounded on `original_source/client/services/sync_service.py::Uploader`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, instrument, warn};

use peerhost_common::policy::CompiledPolicy;
use peerhost_common::{ErrorKind, PeerHostError, Result};

use crate::presync::local_hashes;
use crate::session_client::SessionClient;

const MAX_ATTEMPTS: u32 = 3;
const UPLOAD_CONCURRENCY: usize = 5;
const REVERT_HOLD: Duration = Duration::from_secs(2);

/// Paths currently being written by the Uploader itself (e.g. an auto-revert overwrite), so the
/// Watcher doesn't re-enqueue the write the Uploader just made (spec §4.4).
#[derive(Default)]
pub struct ProcessingContext {
    paths: Mutex<HashSet<String>>,
}

impl ProcessingContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn contains(&self, relative_path: &str) -> bool {
        self.paths.lock().await.contains(relative_path)
    }

    async fn release_after(self: &Arc<Self>, relative_path: String, duration: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            this.paths.lock().await.remove(&relative_path);
        });
    }
}

pub struct Uploader {
    client: Arc<SessionClient>,
    watch_dir: PathBuf,
    policy: Arc<CompiledPolicy>,
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
    processing_context: Arc<ProcessingContext>,
    token: String,
}

impl Uploader {
    pub fn new(
        client: Arc<SessionClient>,
        watch_dir: PathBuf,
        policy: Arc<CompiledPolicy>,
        processing_context: Arc<ProcessingContext>,
        token: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            watch_dir,
            policy,
            semaphore: Arc::new(Semaphore::new(UPLOAD_CONCURRENCY)),
            in_flight: Mutex::new(HashSet::new()),
            processing_context,
            token,
        })
    }

    /// Uploads `relative_path` if it is not already in flight, skipping entirely if it matches
    /// `ignored`/`readonly` (those never upload) and auto-reverting if it matches `restricted`.
    #[instrument(skip(self))]
    pub async fn upload_path(self: &Arc<Self>, relative_path: &str) -> Result<()> {
        if self.processing_context.contains(relative_path).await {
            return Ok(());
        }
        if self.policy.is_ignored(relative_path) || self.policy.is_readonly(relative_path) {
            return Ok(());
        }

        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.contains(relative_path) {
                return Ok(());
            }
            in_flight.insert(relative_path.to_string());
        }

        let result = self.try_upload(relative_path).await;

        self.in_flight.lock().await.remove(relative_path);
        result
    }

    async fn try_upload(self: &Arc<Self>, relative_path: &str) -> Result<()> {
        let _permit = self.semaphore.clone().acquire_owned().await.expect("semaphore open");

        if self.policy.is_restricted(relative_path) {
            return self.auto_revert(relative_path).await;
        }

        let full_path = self.watch_dir.join(relative_path);
        for attempt in 1..=MAX_ATTEMPTS {
            let bytes = match tokio::fs::read(&full_path).await {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(PeerHostError::Io(e)),
            };
            let digest = hex::encode(Sha256::digest(&bytes));

            match self
                .client
                .upload_file(relative_path, &digest, &self.token, bytes)
                .await
            {
                Ok(()) => {
                    info!(path = relative_path, attempt, "uploaded file");
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::SessionLost => {
                    return Err(e);
                }
                Err(e) if e.kind() == ErrorKind::Forbidden => {
                    warn!(path = relative_path, "upload rejected as restricted, reverting");
                    return self.auto_revert(relative_path).await;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(path = relative_path, "upload target not found, dropping");
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Integrity && attempt < MAX_ATTEMPTS => {
                    warn!(path = relative_path, attempt, "hash mismatch mid-upload, retrying");
                    continue;
                }
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!(path = relative_path, attempt, error = %e, "upload failed, retrying");
                    tokio::time::sleep(Duration::from_secs(2 * attempt as u64)).await;
                }
                Err(e) => {
                    warn!(path = relative_path, error = %e, "upload exhausted retries, giving up");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Graceful relinquish step 4 (spec §4.6): scans the local tree, diffs it against a freshly
    /// fetched manifest, and uploads every writable file whose hash doesn't match the server's
    /// copy — catching an edit whose debounce window hadn't fired yet when the drain step ran.
    #[instrument(skip(self))]
    pub async fn final_sync(self: &Arc<Self>) -> Result<usize> {
        let manifest = self.client.manifest().await?;
        let local = local_hashes(&self.watch_dir).await;

        let mut uploaded = 0;
        for (relative_path, local_hash) in &local {
            if self.policy.is_ignored(relative_path)
                || self.policy.is_readonly(relative_path)
                || self.policy.is_restricted(relative_path)
            {
                continue;
            }
            let matches_server = manifest
                .files
                .iter()
                .any(|entry| &entry.path == relative_path && &entry.hash == local_hash);
            if matches_server {
                continue;
            }
            self.upload_path(relative_path).await?;
            uploaded += 1;
        }

        info!(uploaded, "final sync before relinquish complete");
        Ok(uploaded)
    }

    /// Downloads the authoritative copy and overwrites the local file, holding the path in the
    /// processing context for ~2s so the resulting write event doesn't re-enter the queue
    /// (spec §4.4).
    async fn auto_revert(self: &Arc<Self>, relative_path: &str) -> Result<()> {
        self.processing_context
            .paths
            .lock()
            .await
            .insert(relative_path.to_string());
        self.processing_context
            .clone()
            .release_after(relative_path.to_string(), REVERT_HOLD)
            .await;

        let bytes = self.client.fetch_file(relative_path).await?;
        let target = self.watch_dir.join(relative_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = target.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &target).await?;
        info!(path = relative_path, "reverted restricted write to authoritative copy");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn processing_context_reports_held_paths() {
        let ctx = ProcessingContext::new();
        ctx.paths.lock().await.insert("server.properties".to_string());
        assert!(ctx.contains("server.properties").await);
        assert!(!ctx.contains("other.txt").await);
    }
}
