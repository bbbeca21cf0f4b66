//! `host_id` validation (spec §6: "must be >= 6 chars, `[A-Za-z0-9_-]+`; enforce at load/prompt
//! time").

use crate::error::{PeerHostError, Result};

pub fn validate_host_id(host_id: &str) -> Result<()> {
    if host_id.len() < 6 {
        return Err(PeerHostError::Invalid(
            "host_id must be at least 6 characters".into(),
        ));
    }
    if !host_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(PeerHostError::Invalid(
            "host_id may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        assert!(validate_host_id("alice1").is_ok());
        assert!(validate_host_id("bob_2-host").is_ok());
    }

    #[test]
    fn rejects_short_or_invalid_ids() {
        assert!(validate_host_id("ab").is_err());
        assert!(validate_host_id("has space").is_err());
        assert!(validate_host_id("emoji🙂id").is_err());
    }
}
