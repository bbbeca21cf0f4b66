//! Lease token encode/verify.
//!
//! A compact HS256-signed JWT carrying `{host_id, ip_address, expires_at}`, matching
//! `original_source/app/core/security.py`'s payload shape.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{PeerHostError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub host_id: String,
    pub ip_address: String,
    /// Seconds since the Unix epoch; `jsonwebtoken` expects numeric `exp`.
    pub exp: i64,
}

impl TokenClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Signs and verifies lease tokens with a single shared HMAC secret.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    pub fn issue(&self, host_id: &str, ip_address: &str, expires_at: DateTime<Utc>) -> Result<String> {
        let claims = TokenClaims {
            host_id: host_id.to_string(),
            ip_address: ip_address.to_string(),
            exp: expires_at.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| PeerHostError::Unauthorized(format!("token signing failed: {e}")))
    }

    /// Verifies the signature only; the caller is responsible for cross-checking the claims
    /// against the current session holder (see `LeaseManager::heartbeat`).
    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        // expiry is governed by the session's own lock_timeout bookkeeping, not the JWT's
        // exp claim comparison, since a renewed heartbeat reissues timestamps but not the token.
        validation.validate_exp = false;
        decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| PeerHostError::Unauthorized(format!("invalid token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn round_trips_claims() {
        let codec = TokenCodec::new(b"test-secret");
        let expires_at = Utc::now() + Duration::seconds(60);
        let token = codec.issue("alice1", "127.0.0.1", expires_at).unwrap();
        let claims = codec.verify(&token).unwrap();
        assert_eq!(claims.host_id, "alice1");
        assert_eq!(claims.ip_address, "127.0.0.1");
    }

    #[test]
    fn rejects_tampered_token() {
        let codec = TokenCodec::new(b"test-secret");
        let other = TokenCodec::new(b"other-secret");
        let expires_at = Utc::now() + Duration::seconds(60);
        let token = other.issue("alice1", "127.0.0.1", expires_at).unwrap();
        assert!(codec.verify(&token).is_err());
    }
}
