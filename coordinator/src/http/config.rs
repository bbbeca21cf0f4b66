//! `GET /world/config` (spec §6): serves the sync policy document verbatim.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

#[tracing::instrument(skip(state))]
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.policy_doc.clone())
}
