//! Session Client (spec §4, component table): claim/heartbeat/release/get against the
//! coordinator's `/world/session*` endpoints. Grounded on
//! `control_plane/src/attachment_service.rs`'s `dispatch` — a single generic request helper reused
//! by every typed call.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::instrument;

use peerhost_api::manifest::ManifestResponse;
use peerhost_api::session::{
    ClaimSessionRequest, ClaimSessionResponse, HeartbeatResponse, SessionStatusResponse,
};
use peerhost_api::ConfigResponse;
use peerhost_common::{PeerHostError, Result};

pub struct SessionClient {
    http: Client,
    base_url: String,
}

impl SessionClient {
    pub fn new(base_url: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds");
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Generic dispatch matching `attachment_service.rs::dispatch`: serialize, send, and
    /// deserialize a typed response, mapping transport/status failures onto the shared error
    /// taxonomy.
    async fn dispatch<RQ, RS>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&RQ>,
        token: Option<&str>,
    ) -> Result<RS>
    where
        RQ: serde::Serialize,
        RS: serde::de::DeserializeOwned,
    {
        let mut request = self.http.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PeerHostError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        map_status(response.status())?;
        response
            .json::<RS>()
            .await
            .map_err(|e| PeerHostError::Invalid(format!("malformed response body: {e}")))
    }

    #[instrument(skip(self))]
    pub async fn try_claim(&self, host_id: &str) -> Result<ClaimSessionResponse> {
        self.dispatch(
            reqwest::Method::POST,
            "/world/session",
            Some(&ClaimSessionRequest {
                host_id: host_id.to_string(),
            }),
            None,
        )
        .await
    }

    #[instrument(skip(self, token))]
    pub async fn heartbeat(&self, token: &str) -> Result<HeartbeatResponse> {
        self.dispatch::<(), _>(reqwest::Method::POST, "/world/session/heartbeat", None, Some(token))
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_status(&self) -> Result<SessionStatusResponse> {
        self.dispatch::<(), _>(reqwest::Method::GET, "/world/session", None, None)
            .await
    }

    #[instrument(skip(self, token))]
    pub async fn release(&self, token: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url("/world/session"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PeerHostError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        map_status(response.status())
    }

    #[instrument(skip(self))]
    pub async fn manifest(&self) -> Result<ManifestResponse> {
        self.dispatch::<(), _>(reqwest::Method::GET, "/world/manifest", None, None)
            .await
    }

    #[instrument(skip(self))]
    pub async fn config(&self) -> Result<ConfigResponse> {
        self.dispatch::<(), _>(reqwest::Method::GET, "/world/config", None, None)
            .await
    }

    #[instrument(skip(self))]
    pub async fn fetch_file(&self, relative_path: &str) -> Result<bytes::Bytes> {
        let response = self
            .http
            .get(self.url(&format!("/world/files/{relative_path}")))
            .send()
            .await
            .map_err(|e| PeerHostError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        map_status(response.status())?;
        response
            .bytes()
            .await
            .map_err(|e| PeerHostError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
    }

    /// Uploads `body` with the given client-computed hash, returning `Ok` only on the
    /// coordinator's 201. Retry/backoff policy lives in the Uploader (spec §4.4), not here.
    #[instrument(skip(self, token, body))]
    pub async fn upload_file(
        &self,
        relative_path: &str,
        sha256_hex: &str,
        token: &str,
        body: Vec<u8>,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/world/files/{relative_path}")))
            .bearer_auth(token)
            .header(peerhost_api::files::X_FILE_HASH, sha256_hex)
            .body(body)
            .send()
            .await
            .map_err(|e| PeerHostError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        map_status(response.status())
    }
}

fn map_status(status: StatusCode) -> Result<()> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::CONFLICT => Err(PeerHostError::Conflict("session locked".to_string())),
        StatusCode::UNAUTHORIZED => Err(PeerHostError::SessionLost("lease lost".to_string())),
        StatusCode::NOT_FOUND => Err(PeerHostError::NotFound("resource not found".to_string())),
        StatusCode::FORBIDDEN => Err(PeerHostError::Forbidden("policy violation".to_string())),
        StatusCode::BAD_REQUEST => Err(PeerHostError::Integrity("request rejected".to_string())),
        s => Err(PeerHostError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("unexpected status {s}"),
        ))),
    }
}
