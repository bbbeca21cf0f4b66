//! Lease Manager (spec §4.1): the session document and the atomic claim/heartbeat/reset state
//! machine. Grounded on `original_source/app/services/host_service.py` — one `asyncio.Lock`
//! guarding read-modify-write of a single session document, re-expressed as a `tokio::sync::Mutex`
//! guarding a typed `Session` enum instead of a loose dict (spec §9).

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use peerhost_common::token::TokenCodec;
use peerhost_common::{PeerHostError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostInfo {
    pub host_id: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timestamps {
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// The session document, modeled so expiry and the locked/unlocked invariants in spec §3 are
/// enforced by construction rather than by convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    Unlocked,
    Locked {
        host: HostInfo,
        timestamps: Timestamps,
    },
}

/// On-disk shape matching spec §3's `{is_locked, host, timestamps}` document exactly; kept
/// separate from `Session` so the enum's invariants can't be bypassed by deserializing a
/// contradictory `is_locked`/`host` combination straight off disk.
#[derive(Debug, Serialize, Deserialize)]
struct SessionDoc {
    is_locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<HostInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamps: Option<Timestamps>,
}

impl From<&Session> for SessionDoc {
    fn from(session: &Session) -> Self {
        match session {
            Session::Unlocked => SessionDoc {
                is_locked: false,
                host: None,
                timestamps: None,
            },
            Session::Locked { host, timestamps } => SessionDoc {
                is_locked: true,
                host: Some(host.clone()),
                timestamps: Some(timestamps.clone()),
            },
        }
    }
}

impl From<SessionDoc> for Session {
    fn from(doc: SessionDoc) -> Self {
        match (doc.is_locked, doc.host, doc.timestamps) {
            (true, Some(host), Some(timestamps)) => Session::Locked { host, timestamps },
            _ => Session::Unlocked,
        }
    }
}

impl Session {
    pub fn is_locked(&self) -> bool {
        matches!(self, Session::Locked { .. })
    }

    pub fn host_id(&self) -> Option<&str> {
        match self {
            Session::Locked { host, .. } => Some(&host.host_id),
            Session::Unlocked => None,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Session::Locked { timestamps, .. } => now > timestamps.expires_at,
            Session::Unlocked => false,
        }
    }
}

pub struct ClaimOutcome {
    pub token: String,
    pub heartbeat_interval: Duration,
    pub lock_timeout: Duration,
}

struct SessionStore {
    path: PathBuf,
    current: Session,
}

impl SessionStore {
    async fn load(path: PathBuf) -> Self {
        let current = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<SessionDoc>(&bytes)
                .map(Session::from)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "session document corrupted, resetting to unlocked");
                    Session::Unlocked
                }),
            Err(_) => Session::Unlocked,
        };
        Self { path, current }
    }

    async fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let doc = SessionDoc::from(&self.current);
        let bytes = serde_json::to_vec_pretty(&doc).expect("session serializes");
        let tmp = self.path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Owns the session document behind a single mutex, matching the source's one module-level
/// `asyncio.Lock` guarding every mutation (spec §4.1, §5).
pub struct LeaseManager {
    store: Mutex<SessionStore>,
    token_codec: TokenCodec,
    lock_timeout: Duration,
    heartbeat_interval: Duration,
}

impl LeaseManager {
    pub async fn load(
        session_path: PathBuf,
        secret: &[u8],
        lock_timeout: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        let store = SessionStore::load(session_path).await;
        Self {
            store: Mutex::new(store),
            token_codec: TokenCodec::new(secret),
            lock_timeout,
            heartbeat_interval,
        }
    }

    #[instrument(skip(self))]
    pub async fn try_claim(&self, host_id: &str, ip_address: &str) -> Result<ClaimOutcome> {
        let mut store = self.store.lock().await;
        let now = Utc::now();

        if store.current.is_locked() && !store.current.is_expired(now) {
            return Err(PeerHostError::Conflict(format!(
                "session already locked by {}",
                store.current.host_id().unwrap_or("?")
            )));
        }

        let expires_at = now + chrono::Duration::from_std(self.lock_timeout).unwrap();
        let token = self
            .token_codec
            .issue(host_id, ip_address, expires_at)?;

        store.current = Session::Locked {
            host: HostInfo {
                host_id: host_id.to_string(),
                ip_address: ip_address.to_string(),
            },
            timestamps: Timestamps {
                started_at: now,
                last_heartbeat: now,
                expires_at,
            },
        };
        store.persist().await?;
        info!(host_id, "session claimed");

        Ok(ClaimOutcome {
            token,
            heartbeat_interval: self.heartbeat_interval,
            lock_timeout: self.lock_timeout,
        })
    }

    #[instrument(skip(self, token))]
    pub async fn heartbeat(&self, token: &str) -> Result<()> {
        let claims = self.token_codec.verify(token)?;
        let mut store = self.store.lock().await;
        self.check_holder(&store.current, &claims.host_id, &claims.ip_address)?;

        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(self.lock_timeout).unwrap();
        if let Session::Locked { timestamps, .. } = &mut store.current {
            timestamps.last_heartbeat = now;
            timestamps.expires_at = expires_at;
        }
        store.persist().await?;
        Ok(())
    }

    /// Lazy expiry (spec §4.1): any read that observes an expired lock resets it before
    /// returning.
    #[instrument(skip(self))]
    pub async fn get(&self) -> Result<Session> {
        let mut store = self.store.lock().await;
        let now = Utc::now();
        if store.current.is_expired(now) {
            info!("lazily expiring stale session");
            store.current = Session::Unlocked;
            store.persist().await?;
        }
        Ok(store.current.clone())
    }

    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<()> {
        let mut store = self.store.lock().await;
        store.current = Session::Unlocked;
        store.persist().await
    }

    #[instrument(skip(self, token))]
    pub async fn release(&self, token: &str) -> Result<()> {
        let claims = self.token_codec.verify(token)?;
        let mut store = self.store.lock().await;
        self.check_holder(&store.current, &claims.host_id, &claims.ip_address)?;
        store.current = Session::Unlocked;
        store.persist().await
    }

    /// Verifies `token`'s signature and that its holder still matches the locked session,
    /// without mutating any timestamps. Used by handlers (e.g. file upload) that need to confirm
    /// "does this token currently authorize the lease" without the side effects of a heartbeat.
    #[instrument(skip(self, token))]
    pub async fn authorize(&self, token: &str) -> Result<String> {
        let claims = self.token_codec.verify(token)?;
        let store = self.store.lock().await;
        self.check_holder(&store.current, &claims.host_id, &claims.ip_address)?;
        Ok(claims.host_id)
    }

    /// Matches `host_service.py`'s `auth_claim_session`: both `host_id` and `ip_address` must
    /// equal the current holder's, or the caller is unauthorized (spec §4.1 open-question
    /// resolution — preserved faithfully even though it can 401 a holder behind a changing NAT
    /// address).
    fn check_holder(&self, session: &Session, host_id: &str, ip_address: &str) -> Result<()> {
        match session {
            Session::Locked { host, .. }
                if host.host_id == host_id && host.ip_address == ip_address =>
            {
                Ok(())
            }
            _ => Err(PeerHostError::Unauthorized(
                "token does not match current holder".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> LeaseManager {
        let dir = tempfile::tempdir().unwrap();
        LeaseManager::load(
            dir.path().join("session.json"),
            b"0123456789abcdef",
            Duration::from_millis(200),
            Duration::from_millis(50),
        )
        .await
    }

    #[tokio::test]
    async fn claim_then_second_claim_conflicts() {
        let mgr = manager().await;
        mgr.try_claim("alice1", "10.0.0.1").await.unwrap();
        let err = mgr.try_claim("bob22", "10.0.0.2").await.unwrap_err();
        assert!(matches!(err, PeerHostError::Conflict(_)));
    }

    #[tokio::test]
    async fn heartbeat_requires_matching_holder() {
        let mgr = manager().await;
        let claim = mgr.try_claim("alice1", "10.0.0.1").await.unwrap();
        mgr.heartbeat(&claim.token).await.unwrap();

        let other = manager().await;
        let other_claim = other.try_claim("bob22", "10.0.0.2").await.unwrap();
        let err = mgr.heartbeat(&other_claim.token).await.unwrap_err();
        assert!(matches!(err, PeerHostError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn lazy_expiry_unlocks_on_get() {
        let mgr = manager().await;
        mgr.try_claim("alice1", "10.0.0.1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let session = mgr.get().await.unwrap();
        assert!(!session.is_locked());
    }

    #[tokio::test]
    async fn release_then_claim_again_succeeds() {
        let mgr = manager().await;
        let claim = mgr.try_claim("alice1", "10.0.0.1").await.unwrap();
        mgr.release(&claim.token).await.unwrap();
        let second = mgr.try_claim("bob22", "10.0.0.2").await.unwrap();
        assert!(!second.token.is_empty());
    }
}
