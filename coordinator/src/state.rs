//! Shared application state threaded through every HTTP handler (spec §9: "explicit long-lived
//! services constructed at startup and passed through the component graph", no globals).

use peerhost_common::policy::{CompiledPolicy, SyncPolicyDoc};

use crate::content_store::ContentStore;
use crate::file_record::FileRecordIndex;
use crate::lease::LeaseManager;
use crate::manifest::ManifestService;

pub struct AppState {
    pub lease_manager: LeaseManager,
    pub content_store: ContentStore,
    pub manifest_service: ManifestService,
    pub file_records: FileRecordIndex,
    pub policy_doc: SyncPolicyDoc,
    pub policy: CompiledPolicy,
}
