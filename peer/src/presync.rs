//! Pre-Sync Engine (spec §4, PARTICIPANT/PRE_HOST_SYNC states): download-side diff against the
//! coordinator manifest, bounded-concurrency download, convergence check, optional mirror-prune.
//! Grounded on `original_source/client/services/sync_service.py::PreSyncManager`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use peerhost_api::manifest::ManifestFileEntry;
use peerhost_common::policy::CompiledPolicy;
use peerhost_common::Result;

use crate::session_client::SessionClient;

const DOWNLOAD_CONCURRENCY: usize = 10;

pub struct PreSyncEngine {
    client: Arc<SessionClient>,
    watch_dir: PathBuf,
    policy: Arc<CompiledPolicy>,
    mirror_sync: bool,
}

pub struct SyncOutcome {
    pub downloaded: usize,
    pub is_synced: bool,
}

impl PreSyncEngine {
    pub fn new(
        client: Arc<SessionClient>,
        watch_dir: PathBuf,
        policy: Arc<CompiledPolicy>,
        mirror_sync: bool,
    ) -> Self {
        Self {
            client,
            watch_dir,
            policy,
            mirror_sync,
        }
    }

    /// Downloads every server file not already present locally with a matching hash. Returns
    /// whether the local tree fully converges with the server manifest (ignoring
    /// restricted/ignored/readonly exclusions is not needed here since those are still
    /// downloadable — only upload is restricted).
    #[instrument(skip(self))]
    pub async fn sync_from_server(&self) -> Result<SyncOutcome> {
        let manifest = self.client.manifest().await?;
        let local = local_hashes(&self.watch_dir).await;

        let semaphore = Arc::new(Semaphore::new(DOWNLOAD_CONCURRENCY));
        let mut tasks = Vec::new();
        let mut to_download = Vec::new();

        for entry in &manifest.files {
            let needs_download = match local.get(&entry.path) {
                Some(local_hash) => local_hash != &entry.hash,
                None => true,
            };
            if needs_download {
                to_download.push(entry.clone());
            }
        }

        for entry in to_download.clone() {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
            let client = self.client.clone();
            let watch_dir = self.watch_dir.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                download_file(&client, &watch_dir, &entry).await
            }));
        }

        let mut downloaded = 0;
        for task in tasks {
            match task.await {
                Ok(Ok(())) => downloaded += 1,
                Ok(Err(e)) => warn!(error = %e, "download failed"),
                Err(e) => warn!(error = %e, "download task panicked"),
            }
        }

        if self.mirror_sync {
            if let Err(e) = self.prune_extra_files(&manifest.files).await {
                warn!(error = %e, "mirror prune failed");
            }
        }

        let is_synced = self.is_fully_synced(&manifest.files).await;
        Ok(SyncOutcome {
            downloaded,
            is_synced,
        })
    }

    async fn is_fully_synced(&self, entries: &[ManifestFileEntry]) -> bool {
        let local = local_hashes(&self.watch_dir).await;
        entries
            .iter()
            .all(|entry| local.get(&entry.path) == Some(&entry.hash))
    }

    /// Deletes local files absent from the server manifest, honoring the source's "skip safe
    /// patterns before membership check" ordering (spec §9 open question — the ordering can
    /// shadow legitimate pruning of files that happen to match a safe pattern elsewhere; kept
    /// faithfully, not resolved).
    async fn prune_extra_files(&self, entries: &[ManifestFileEntry]) -> Result<()> {
        let server_paths: HashSet<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        let local = local_hashes(&self.watch_dir).await;

        for path in local.keys() {
            if self.policy.is_ignored(path) || self.policy.is_readonly(path) {
                continue;
            }
            if !server_paths.contains(path.as_str()) {
                let full = self.watch_dir.join(path);
                if let Err(e) = tokio::fs::remove_file(&full).await {
                    warn!(path, error = %e, "failed to prune extra local file");
                } else {
                    info!(path, "pruned extra local file (mirror_sync)");
                }
            }
        }
        Ok(())
    }
}

async fn download_file(
    client: &SessionClient,
    watch_dir: &Path,
    entry: &ManifestFileEntry,
) -> Result<()> {
    let bytes = client.fetch_file(&entry.path).await?;
    let target = watch_dir.join(&entry.path);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = target.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, &target).await?;
    Ok(())
}

/// Shared with the Uploader's final-sync pass (spec §4.6 graceful relinquish step 4) so both
/// sides of the sync walk the tree and hash files the same way.
pub(crate) async fn local_hashes(watch_dir: &Path) -> std::collections::HashMap<String, String> {
    let root = watch_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut map = std::collections::HashMap::new();
        for entry in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| e.file_name() != "meta")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let relative_str = relative.to_string_lossy().replace('\\', "/");
            if let Ok(bytes) = std::fs::read(entry.path()) {
                let digest = hex::encode(Sha256::digest(&bytes));
                map.insert(relative_str, digest);
            }
        }
        map
    })
    .await
    .unwrap_or_default()
}
