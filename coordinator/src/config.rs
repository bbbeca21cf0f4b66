//! Coordinator configuration: a TOML file plus a `--config` CLI override, validated and loaded
//! once at startup (spec §2, §6).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("config field {field} is invalid: {detail}")]
    Invalid { field: &'static str, detail: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    pub listen_addr: SocketAddr,
    pub world_root: PathBuf,
    pub state_dir: PathBuf,
    pub hmac_secret: String,

    #[serde(with = "humantime_serde", default = "default_lock_timeout")]
    pub lock_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    #[serde(default)]
    pub policy_path: Option<PathBuf>,

    #[serde(default)]
    pub tunnel: Option<TunnelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    pub binary_path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

impl CoordinatorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CoordinatorConfig =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.hmac_secret.len() < 16 {
            return Err(ConfigError::Invalid {
                field: "hmac_secret",
                detail: "must be at least 16 bytes".to_string(),
            });
        }
        if self.lock_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "lock_timeout",
                detail: "must be greater than zero".to_string(),
            });
        }
        if self.heartbeat_interval >= self.lock_timeout {
            return Err(ConfigError::Invalid {
                field: "heartbeat_interval",
                detail: "must be smaller than lock_timeout".to_string(),
            });
        }
        Ok(())
    }

    pub fn policy_path(&self) -> PathBuf {
        self.policy_path
            .clone()
            .unwrap_or_else(|| self.state_dir.join("policy.toml"))
    }

    pub fn session_path(&self) -> PathBuf {
        self.world_root.join("meta").join("session.json")
    }

    pub fn file_records_path(&self) -> PathBuf {
        self.world_root.join("meta").join("files.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            listen_addr = "0.0.0.0:8080"
            world_root = "/tmp/world"
            state_dir = "/tmp/state"
            hmac_secret = "short"
            "#,
        )
        .unwrap();
        let err = CoordinatorConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "hmac_secret", .. }));
    }

    #[test]
    fn loads_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            listen_addr = "0.0.0.0:8080"
            world_root = "/tmp/world"
            state_dir = "/tmp/state"
            hmac_secret = "0123456789abcdef"
            "#,
        )
        .unwrap();
        let config = CoordinatorConfig::load(&path).unwrap();
        assert_eq!(config.lock_timeout, Duration::from_secs(60));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
    }
}
