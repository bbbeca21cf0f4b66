//! Header names used by the streamed file endpoints (spec §6).

/// Carries the client-computed SHA-256 of the uploaded body, hex-encoded.
pub const X_FILE_HASH: &str = "x-file-hash";
