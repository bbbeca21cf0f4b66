//! The shared error taxonomy described in spec §7.
//!
//! Both the coordinator and the peer classify every fallible operation into one of these
//! kinds. The coordinator maps each kind to a single HTTP status at its API boundary; the peer
//! treats `SessionLost` specially (it aborts the current sweep rather than being retried).

use std::fmt;

/// Abstract error kind, independent of any particular transport.
#[derive(thiserror::Error, Debug)]
pub enum PeerHostError {
    /// Lease contention: the session is already locked by someone else.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Token invalid, expired, or holder mismatch.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Session or file absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed path or bad input.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Policy violation (restricted/ignored path).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Hash mismatch on upload.
    #[error("integrity mismatch: {0}")]
    Integrity(String),

    /// Disk or network transport failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A 401 was encountered mid-sweep; the caller must abort, not retry.
    #[error("session lost: {0}")]
    SessionLost(String),
}

impl PeerHostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PeerHostError::Conflict(_) => ErrorKind::Conflict,
            PeerHostError::Unauthorized(_) => ErrorKind::Unauthorized,
            PeerHostError::NotFound(_) => ErrorKind::NotFound,
            PeerHostError::Invalid(_) => ErrorKind::Invalid,
            PeerHostError::Forbidden(_) => ErrorKind::Forbidden,
            PeerHostError::Integrity(_) => ErrorKind::Integrity,
            PeerHostError::Io(_) => ErrorKind::Io,
            PeerHostError::SessionLost(_) => ErrorKind::SessionLost,
        }
    }
}

/// Tag-only projection of [`PeerHostError`], useful for `match`-ing on the kind without the
/// message payload (e.g. deciding whether an upload attempt should be retried).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    Unauthorized,
    NotFound,
    Invalid,
    Forbidden,
    Integrity,
    Io,
    SessionLost,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Io => "io",
            ErrorKind::SessionLost => "session_lost",
        };
        f.write_str(s)
    }
}

pub type Result<T> = std::result::Result<T, PeerHostError>;
