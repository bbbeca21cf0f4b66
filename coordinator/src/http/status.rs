//! `GET /status` (spec §6): the ambient health-check used by the tunnel readiness probe and the
//! peer's offline-mode polling.

use axum::Json;
use peerhost_api::status::StatusResponse;

pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse::default())
}
