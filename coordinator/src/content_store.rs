//! Content Store (spec §4.2): sandboxed streaming PUT/GET rooted at `world_root`, grounded on
//! `original_source/app/services/file_service.py`'s `save_file`/`get_file` — unique temp sibling,
//! hash-while-streaming, atomic rename as the commit step.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

use peerhost_common::path::validate_relative_path;
use peerhost_common::policy::CompiledPolicy;
use peerhost_common::{PeerHostError, Result};

use crate::file_record::{FileRecord, FileRecordIndex};

pub struct ContentStore {
    world_root: PathBuf,
}

pub struct PutOutcome {
    pub sha256: String,
    pub size_bytes: u64,
}

impl ContentStore {
    pub fn new(world_root: PathBuf) -> Self {
        Self { world_root }
    }

    pub fn world_root(&self) -> &Path {
        &self.world_root
    }

    fn resolve(&self, relative_path: &str) -> Result<(String, PathBuf)> {
        let normalized = validate_relative_path(relative_path)?;
        let full = self.world_root.join(&normalized);
        Ok((normalized, full))
    }

    fn check_writable(policy: &CompiledPolicy, normalized: &str) -> Result<()> {
        if policy.is_restricted(normalized) {
            return Err(PeerHostError::Forbidden(format!(
                "{normalized} matches a restricted pattern"
            )));
        }
        if policy.is_ignored(normalized) {
            return Err(PeerHostError::Forbidden(format!(
                "{normalized} matches an ignored pattern"
            )));
        }
        Ok(())
    }

    /// Streams `body` to disk, verifying the client-declared hash matches the bytes actually
    /// received, then atomically replaces the target.
    #[instrument(skip(self, policy, body, records))]
    pub async fn put(
        &self,
        relative_path: &str,
        client_sha256: &str,
        host_id: &str,
        host_ip: &str,
        policy: &CompiledPolicy,
        records: &FileRecordIndex,
        mut body: impl tokio_stream::Stream<Item = std::io::Result<bytes::Bytes>> + Unpin,
    ) -> Result<PutOutcome> {
        use tokio_stream::StreamExt;

        let (normalized, target) = self.resolve(relative_path)?;
        Self::check_writable(policy, &normalized)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let tmp_path = target.with_extension(format!(
            "{}.{}.tmp",
            target.extension().and_then(|e| e.to_str()).unwrap_or(""),
            &nonce[..8]
        ));

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        let mut hasher = Sha256::new();
        let mut size_bytes: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&tmp_path).await;
                    return Err(PeerHostError::Io(e));
                }
            };
            hasher.update(&chunk);
            size_bytes += chunk.len() as u64;
            if let Err(e) = file.write_all(&chunk).await {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(PeerHostError::Io(e));
            }
        }
        file.flush().await?;
        drop(file);

        let digest = hex::encode(hasher.finalize());
        if digest != client_sha256 {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(PeerHostError::Integrity(format!(
                "expected {client_sha256}, computed {digest}"
            )));
        }

        if tokio::fs::metadata(&target).await.is_ok() {
            let _ = tokio::fs::remove_file(&target).await;
        }
        tokio::fs::rename(&tmp_path, &target).await?;

        records
            .upsert(FileRecord {
                path: normalized.clone(),
                file_name: Path::new(&normalized)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                sha256: digest.clone(),
                size_bytes,
                updated_at: chrono::Utc::now(),
                update_by_host: host_id.to_string(),
                host_ip: host_ip.to_string(),
            })
            .await?;

        info!(path = %normalized, size_bytes, "stored file");
        Ok(PutOutcome {
            sha256: digest,
            size_bytes,
        })
    }

    // restricted/ignored files are downloadable — only upload is forbidden, since auto-revert
    // needs to fetch the authoritative copy of a restricted file.
    #[instrument(skip(self, _policy))]
    pub async fn get(&self, relative_path: &str, _policy: &CompiledPolicy) -> Result<Option<Vec<u8>>> {
        let (_normalized, full) = self.resolve(relative_path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PeerHostError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerhost_common::policy::SyncPolicyDoc;

    fn store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    fn body(bytes: &'static [u8]) -> impl tokio_stream::Stream<Item = std::io::Result<bytes::Bytes>> {
        tokio_stream::once(Ok(bytes::Bytes::from_static(bytes)))
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (dir, store) = store();
        let records = FileRecordIndex::load(dir.path().join("meta/files.json")).await;
        let policy = CompiledPolicy::compile(&SyncPolicyDoc::default());
        let data = b"hello world";
        let hash = hex::encode(Sha256::digest(data));

        store
            .put(
                "a/b.txt",
                &hash,
                "alice1",
                "10.0.0.5",
                &policy,
                &records,
                body(data),
            )
            .await
            .unwrap();

        let fetched = store.get("a/b.txt", &policy).await.unwrap().unwrap();
        assert_eq!(fetched, data);
    }

    #[tokio::test]
    async fn put_rejects_hash_mismatch_and_leaves_no_temp() {
        let (dir, store) = store();
        let records = FileRecordIndex::load(dir.path().join("meta/files.json")).await;
        let policy = CompiledPolicy::compile(&SyncPolicyDoc::default());

        let err = store
            .put(
                "x.dat",
                "deadbeef",
                "alice1",
                "10.0.0.5",
                &policy,
                &records,
                body(b"payload"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PeerHostError::Integrity(_)));
        assert!(!dir.path().join("x.dat").exists());

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            assert!(!entry.file_name().to_string_lossy().contains(".tmp"));
        }
    }

    #[tokio::test]
    async fn put_rejects_restricted_pattern() {
        let (dir, store) = store();
        let records = FileRecordIndex::load(dir.path().join("meta/files.json")).await;
        let policy = CompiledPolicy::compile(&SyncPolicyDoc::default());
        let data = b"x=1";
        let hash = hex::encode(Sha256::digest(data));

        let err = store
            .put(
                "server.properties",
                &hash,
                "alice1",
                "10.0.0.5",
                &policy,
                &records,
                body(data),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PeerHostError::Forbidden(_)));
    }

    #[tokio::test]
    async fn put_rejects_path_traversal() {
        let (dir, store) = store();
        let records = FileRecordIndex::load(dir.path().join("meta/files.json")).await;
        let policy = CompiledPolicy::compile(&SyncPolicyDoc::default());

        let err = store
            .put(
                "../escape.txt",
                "00",
                "alice1",
                "10.0.0.5",
                &policy,
                &records,
                body(b"x"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PeerHostError::Invalid(_)));
    }
}
