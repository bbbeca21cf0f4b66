//! `GET /world/manifest` (spec §6), delegating to the Manifest Service.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use peerhost_api::manifest::{ManifestFileEntry, ManifestResponse};

use crate::http::error::ApiError;
use crate::state::AppState;

#[tracing::instrument(skip(state))]
pub async fn get_manifest(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let scan = state.manifest_service.scan().await?;
    let files = scan
        .entries
        .into_iter()
        .map(|e| ManifestFileEntry {
            path: e.path,
            hash: e.sha256,
            size: e.size_bytes,
        })
        .collect();

    Ok(Json(ManifestResponse {
        files,
        total_files: scan.total_files,
        total_size: scan.total_size,
    }))
}
