//! `/world/session*` handlers (spec §6), delegating to the Lease Manager.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use peerhost_api::session::{
    ClaimSessionRequest, ClaimSessionResponse, HeartbeatResponse, SessionStatusResponse,
};

use crate::http::auth::bearer_token;
use crate::http::error::ApiError;
use crate::lease::Session;
use crate::state::AppState;

#[tracing::instrument(skip(state))]
pub async fn claim(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<ClaimSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .lease_manager
        .try_claim(&request.host_id, &addr.ip().to_string())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ClaimSessionResponse {
            token: outcome.token,
            heartbeat_interval_secs: outcome.heartbeat_interval.as_secs(),
            lock_timeout_secs: outcome.lock_timeout.as_secs(),
        }),
    ))
}

#[tracing::instrument(skip(state, headers))]
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    state.lease_manager.heartbeat(token).await?;
    Ok(Json(HeartbeatResponse {
        status: "ok".to_string(),
    }))
}

#[tracing::instrument(skip(state))]
pub async fn status(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let session = state.lease_manager.get().await?;
    let (is_locked, host_id) = match &session {
        Session::Locked { host, .. } => (true, Some(host.host_id.clone())),
        Session::Unlocked => (false, None),
    };
    Ok(Json(SessionStatusResponse { is_locked, host_id }))
}

#[tracing::instrument(skip(state, headers))]
pub async fn release(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    state.lease_manager.release(token).await?;
    Ok(StatusCode::NO_CONTENT)
}
