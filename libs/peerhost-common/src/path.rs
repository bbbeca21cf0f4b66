//! Sandbox path validation shared by the Content Store and the Manifest Service.

use crate::error::{PeerHostError, Result};

/// The prefix reserved for coordinator-private state within `world_root`.
pub const RESERVED_PREFIX: &str = "meta";

/// Validates a client-supplied relative path against the world-root sandbox (spec §4.2 step 1,
/// §8 invariant 7). Returns the normalized, POSIX-style relative path on success.
pub fn validate_relative_path(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Err(PeerHostError::Invalid("empty path".into()));
    }
    if raw.starts_with('/') {
        return Err(PeerHostError::Invalid(format!("absolute path not allowed: {raw}")));
    }

    let mut normalized_parts = Vec::new();
    for component in raw.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                return Err(PeerHostError::Invalid(format!(
                    "path traversal not allowed: {raw}"
                )))
            }
            other => normalized_parts.push(other),
        }
    }

    if normalized_parts.is_empty() {
        return Err(PeerHostError::Invalid("empty path".into()));
    }
    if normalized_parts[0] == RESERVED_PREFIX {
        return Err(PeerHostError::Forbidden(format!(
            "access to {RESERVED_PREFIX}/ is restricted"
        )));
    }

    Ok(normalized_parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_relative_path() {
        assert_eq!(validate_relative_path("a/b.txt").unwrap(), "a/b.txt");
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_relative_path("../etc/passwd").is_err());
        assert!(validate_relative_path("a/../../b").is_err());
    }

    #[test]
    fn rejects_absolute() {
        assert!(validate_relative_path("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_meta_prefix() {
        assert!(validate_relative_path("meta/session.json").is_err());
    }
}
