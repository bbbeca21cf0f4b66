//! Maps `PeerHostError` onto HTTP statuses (spec §7): one `thiserror` enum, one mapping, applied
//! at every handler boundary via `IntoResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use peerhost_common::{ErrorKind, PeerHostError};

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    detail: String,
}

pub struct ApiError(pub PeerHostError);

impl From<PeerHostError> for ApiError {
    fn from(err: PeerHostError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Invalid => StatusCode::BAD_REQUEST,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Integrity => StatusCode::BAD_REQUEST,
            ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::SessionLost => StatusCode::UNAUTHORIZED,
        };
        let body = ErrorBody {
            error: self.0.kind().to_string(),
            detail: self.0.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
