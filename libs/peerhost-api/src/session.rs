//! Wire structs for `/world/session*` (spec §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimSessionRequest {
    pub host_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimSessionResponse {
    pub token: String,
    pub heartbeat_interval_secs: u64,
    pub lock_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub is_locked: bool,
    pub host_id: Option<String>,
}
