//! Wire struct for the ambient `/status` health-check (spec §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl Default for StatusResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}
