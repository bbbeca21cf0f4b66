//! `/world/files/{path…}` handlers (spec §6), delegating to the Content Store.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{ConnectInfo, BodyStream, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use tokio_stream::{Stream, StreamExt};

use peerhost_api::files::X_FILE_HASH;
use peerhost_common::PeerHostError;

use crate::http::auth::bearer_token;
use crate::http::error::ApiError;
use crate::state::AppState;

/// World files (save data, mod jars) can run well past axum's 2MB default body limit, so this
/// takes the body as a real stream instead of `Bytes` — the coordinator never buffers a whole
/// upload in memory, matching the source's `anyio.open_file` streaming writer.
#[tracing::instrument(skip(state, headers, body))]
pub async fn put_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: BodyStream,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    let host_id = state.lease_manager.authorize(token).await?;

    let client_hash = headers
        .get(X_FILE_HASH)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PeerHostError::Invalid(format!("missing {X_FILE_HASH} header")))?
        .to_string();

    let body_stream: Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>> = Box::pin(
        body.map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))),
    );

    let outcome = state
        .content_store
        .put(
            &path,
            &client_hash,
            &host_id,
            &addr.ip().to_string(),
            &state.policy,
            &state.file_records,
            body_stream,
        )
        .await?;

    tracing::info!(path = %path, sha256 = %outcome.sha256, "file uploaded");
    Ok(StatusCode::CREATED)
}

#[tracing::instrument(skip(state))]
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.content_store.get(&path, &state.policy).await? {
        Some(bytes) => Ok((StatusCode::OK, bytes)),
        None => Err(PeerHostError::NotFound(format!("{path} not found")).into()),
    }
}
