//! Manifest Service (spec §4.3): a recursive scan of `world_root` producing `{path, sha256,
//! size}` entries, with a `(path, mtime, size)`-keyed digest cache so unchanged files are not
//! rehashed on every scan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::instrument;
use walkdir::WalkDir;

use peerhost_common::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ManifestEntry {
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub entries: Vec<ManifestEntry>,
    pub total_files: u64,
    pub total_size: u64,
}

#[derive(Clone)]
struct CacheEntry {
    mtime: SystemTime,
    size: u64,
    sha256: String,
}

/// Excluded unconditionally from every scan, independent of the operator-editable sync policy
/// (spec §4.3): coordinator-private state plus transient junk.
const EXCLUDED_GLOBS: &[&str] = &["meta", "*.lock", "*.tmp", "*.log"];

pub struct ManifestService {
    world_root: PathBuf,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl ManifestService {
    pub fn new(world_root: PathBuf) -> Self {
        Self {
            world_root,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<ScanResult> {
        let root = self.world_root.clone();
        let stale: Vec<(String, SystemTime, u64)> = tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .into_iter()
                .filter_entry(|e| e.file_name() != "meta")
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|entry| {
                    let relative = entry.path().strip_prefix(&root).ok()?;
                    let relative_str = relative.to_string_lossy().replace('\\', "/");
                    if is_excluded(&relative_str) {
                        return None;
                    }
                    let metadata = entry.metadata().ok()?;
                    Some((relative_str, metadata.modified().ok()?, metadata.len()))
                })
                .collect()
        })
        .await
        .expect("scan task panicked");

        let mut cache = self.cache.lock().await;
        let mut fresh_cache = HashMap::with_capacity(stale.len());
        let mut result = ScanResult::default();

        for (relative_path, mtime, size) in stale {
            let sha256 = match cache.get(&relative_path) {
                Some(cached) if cached.mtime == mtime && cached.size == size => {
                    cached.sha256.clone()
                }
                _ => {
                    let full = self.world_root.join(&relative_path);
                    hash_file(&full).await?
                }
            };

            fresh_cache.insert(
                relative_path.clone(),
                CacheEntry {
                    mtime,
                    size,
                    sha256: sha256.clone(),
                },
            );
            result.total_files += 1;
            result.total_size += size;
            result.entries.push(ManifestEntry {
                path: relative_path,
                sha256,
                size_bytes: size,
            });
        }

        // entries for deleted files are naturally evicted by not being re-added (spec §4.3).
        *cache = fresh_cache;
        Ok(result)
    }
}

fn is_excluded(relative_path: &str) -> bool {
    let first_component = relative_path.split('/').next().unwrap_or(relative_path);
    if first_component == "meta" {
        return true;
    }
    let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    EXCLUDED_GLOBS
        .iter()
        .filter(|g| **g != "meta")
        .any(|pattern| {
            let suffix = pattern.trim_start_matches('*');
            file_name.ends_with(suffix)
        })
}

async fn hash_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let digest = tokio::task::spawn_blocking(move || Sha256::digest(&bytes))
        .await
        .expect("hash task panicked");
    Ok(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scan_excludes_meta_and_transient_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("meta")).await.unwrap();
        tokio::fs::write(dir.path().join("meta/session.json"), b"{}").await.unwrap();
        tokio::fs::write(dir.path().join("world.dat"), b"abc").await.unwrap();
        tokio::fs::write(dir.path().join("scratch.tmp"), b"xyz").await.unwrap();

        let service = ManifestService::new(dir.path().to_path_buf());
        let result = service.scan().await.unwrap();

        assert_eq!(result.total_files, 1);
        assert_eq!(result.entries[0].path, "world.dat");
    }

    #[tokio::test]
    async fn scan_reuses_cache_for_unchanged_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"hello").await.unwrap();
        let service = ManifestService::new(dir.path().to_path_buf());

        let first = service.scan().await.unwrap();
        let second = service.scan().await.unwrap();
        assert_eq!(first.entries[0].sha256, second.entries[0].sha256);
    }
}
