//! Derived file-record index (spec §3): audit/UI metadata updated on every successful upload,
//! not consulted for integrity. Persisted as one JSON document keyed by path, following the same
//! load/persist shape as the session document in `lease.rs`.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use peerhost_common::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub file_name: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub updated_at: DateTime<Utc>,
    pub update_by_host: String,
    pub host_ip: String,
}

pub struct FileRecordIndex {
    path: PathBuf,
    records: Mutex<HashMap<String, FileRecord>>,
}

impl FileRecordIndex {
    pub async fn load(path: PathBuf) -> Self {
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "file record index corrupted, resetting");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    pub async fn upsert(&self, record: FileRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(record.path.clone(), record);
        self.persist(&records).await
    }

    pub async fn get(&self, path: &str) -> Option<FileRecord> {
        self.records.lock().await.get(path).cloned()
    }

    async fn persist(&self, records: &HashMap<String, FileRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(records).expect("records serialize");
        let tmp = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta/files.json");
        let index = FileRecordIndex::load(path.clone()).await;
        index
            .upsert(FileRecord {
                path: "a.txt".to_string(),
                file_name: "a.txt".to_string(),
                sha256: "abc".to_string(),
                size_bytes: 3,
                updated_at: Utc::now(),
                update_by_host: "alice1".to_string(),
                host_ip: "10.0.0.1".to_string(),
            })
            .await
            .unwrap();

        let reloaded = FileRecordIndex::load(path).await;
        assert_eq!(reloaded.get("a.txt").await.unwrap().sha256, "abc");
    }
}
