//! Wire structs for `/world/manifest` (spec §3, §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ManifestFileEntry {
    pub path: String,
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ManifestResponse {
    pub files: Vec<ManifestFileEntry>,
    pub total_files: u64,
    pub total_size: u64,
}
