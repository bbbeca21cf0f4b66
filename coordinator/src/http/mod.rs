//! HTTP surface (spec §6), built on axum with tower-http request tracing, mirroring the
//! teacher's `request_span`-per-handler convention from `safekeeper/src/http/routes.rs`.

mod auth;
mod config;
mod error;
mod files;
mod manifest;
mod session;
mod status;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn make_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/world/session",
            post(session::claim)
                .get(session::status)
                .delete(session::release),
        )
        .route("/world/session/heartbeat", post(session::heartbeat))
        .route("/world/manifest", get(manifest::get_manifest))
        .route("/world/config", get(config::get_config))
        .route("/world/files/*path", post(files::put_file).get(files::get_file))
        .route("/status", get(status::status))
        // world files (save data, mod jars) routinely exceed axum's 2MB default; the Content
        // Store streams to disk rather than buffering, so there's no in-memory reason to cap it.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
