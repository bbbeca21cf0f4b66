//! JSON request/response structs for `coordinator`'s HTTP API, shared with `peer`'s HTTP client
//! so the wire format is defined exactly once (mirrors the teacher's `compute_api` crate).

pub mod files;
pub mod manifest;
pub mod session;
pub mod status;

pub use peerhost_common::policy::SyncPolicyDoc as ConfigResponse;
