//! Types and helpers shared between the `coordinator` and `peer` binaries: the error taxonomy,
//! lease token codec, sandbox path validation, sync-policy pattern matching, and subprocess
//! tracking.

pub mod error;
pub mod host_id;
pub mod path;
pub mod policy;
pub mod process;
pub mod token;

pub use error::{ErrorKind, PeerHostError, Result};
