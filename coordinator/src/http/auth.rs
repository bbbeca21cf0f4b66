//! Bearer-token extraction shared by every mutating handler.

use axum::http::HeaderMap;

use peerhost_common::{PeerHostError, Result};

pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| PeerHostError::Unauthorized("missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| PeerHostError::Unauthorized("Authorization header is not valid UTF-8".to_string()))?;

    raw.strip_prefix("Bearer ")
        .ok_or_else(|| PeerHostError::Unauthorized("Authorization header is not a Bearer token".to_string()))
}
