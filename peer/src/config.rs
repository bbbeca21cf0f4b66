//! Peer settings (spec §2, §6): `server_url`, `host_id`, `watch_dir`, `debug`, loaded from a JSON
//! file and validated at startup rather than deep in the call stack.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use peerhost_common::host_id::validate_host_id;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid host_id: {0}")]
    InvalidHostId(#[from] peerhost_common::PeerHostError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSettings {
    pub server_url: String,
    pub host_id: String,
    pub watch_dir: PathBuf,
    #[serde(default)]
    pub debug: bool,
}

impl PeerSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: PeerSettings =
            serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        validate_host_id(&settings.host_id)?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let serialized = serde_json::to_string_pretty(self).expect("settings serialize");
        std::fs::write(path, serialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_host_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server_url": "http://localhost:8080", "host_id": "x", "watch_dir": "/tmp/world"}"#,
        )
        .unwrap();
        assert!(PeerSettings::load(&path).is_err());
    }

    #[test]
    fn loads_valid_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server_url": "http://localhost:8080", "host_id": "alice1", "watch_dir": "/tmp/world"}"#,
        )
        .unwrap();
        let settings = PeerSettings::load(&path).unwrap();
        assert_eq!(settings.host_id, "alice1");
        assert!(!settings.debug);
    }
}
