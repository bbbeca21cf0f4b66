//! Peer State Machine (spec §4.6): the six-state loop. Grounded on
//! `original_source/client/state_machine.py` for state/transition shape; the teacher's
//! `compute_ctl.rs` main-loop shape for how a long-running driver holds shared state and does not
//! exit the process on a handler error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use peerhost_api::session::ClaimSessionResponse;
use peerhost_common::policy::{CompiledPolicy, SyncPolicyDoc};
use peerhost_common::process::ProcessTracker;
use peerhost_common::ErrorKind;

use crate::config::PeerSettings;
use crate::presync::PreSyncEngine;
use crate::session_client::SessionClient;
use crate::tunnel::{TunnelClient, TunnelMode};
use crate::uploader::{ProcessingContext, Uploader};
use crate::watcher::WriteWatcher;
use crate::workload::WorkloadSupervisor;

const UNREACHABLE_POLL: Duration = Duration::from_secs(2);
const HANDLER_ERROR_BACKOFF: Duration = Duration::from_secs(5);
const CONSECUTIVE_FAILURE_LIMIT: u32 = 3;
const UPLOAD_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Init,
    Discovery,
    Participant,
    PreHostSync,
    ClaimHost,
    Hosting,
}

pub struct StateMachine {
    settings: PeerSettings,
    session_client: Arc<SessionClient>,
    tracker: Arc<Mutex<ProcessTracker>>,
    policy: Option<Arc<CompiledPolicy>>,
    policy_doc: Option<SyncPolicyDoc>,
    tunnel_binary: PathBuf,
    /// Egress (participant-mode) tunnel, started once in INIT and kept running through
    /// DISCOVERY/PARTICIPANT/PRE_HOST_SYNC/CLAIM_HOST so a non-hosting peer can still reach the
    /// active host. Stopped just before claiming HOSTING and restarted on the way back out
    /// (spec §4.9: the two modes are mutually exclusive, but orchestrating the switch is this
    /// state machine's job, not `TunnelClient`'s).
    participant_tunnel: TunnelClient,
    state: PeerState,
    pending_claim: Option<ClaimSessionResponse>,
    shutdown: CancellationToken,
}

impl StateMachine {
    pub fn new(
        settings: PeerSettings,
        session_client: Arc<SessionClient>,
        tracker: Arc<Mutex<ProcessTracker>>,
        tunnel_binary: PathBuf,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            session_client,
            participant_tunnel: TunnelClient::new(tunnel_binary.clone(), tracker.clone()),
            tracker,
            policy: None,
            policy_doc: None,
            tunnel_binary,
            state: PeerState::Init,
            pending_claim: None,
            shutdown,
        }
    }

    /// Drives the state machine until `shutdown` is cancelled. Mirrors the source's top-level
    /// loop: a handler error is logged and the current state is re-entered after a fixed backoff,
    /// never exiting the process on its own (spec §7). HOSTING observes `shutdown` directly so a
    /// signal received mid-lease still runs the graceful relinquish sequence before this returns.
    pub async fn run(mut self) {
        loop {
            if self.shutdown.is_cancelled() && self.state != PeerState::Hosting {
                info!("shutdown requested, state machine exiting");
                return;
            }

            let next = match self.state {
                PeerState::Init => self.handle_init().await,
                PeerState::Discovery => self.handle_discovery().await,
                PeerState::Participant => self.handle_participant().await,
                PeerState::PreHostSync => self.handle_pre_host_sync().await,
                PeerState::ClaimHost => self.handle_claim_host().await,
                PeerState::Hosting => self.handle_hosting().await,
            };
            match next {
                Ok(state) => self.state = state,
                Err(e) => {
                    error!(state = ?self.state, error = %e, "state handler failed, retrying after backoff");
                    tokio::time::sleep(HANDLER_ERROR_BACKOFF).await;
                }
            }
        }
    }

    async fn handle_init(&mut self) -> anyhow::Result<PeerState> {
        let config = self.session_client.config().await?;
        self.policy = Some(Arc::new(CompiledPolicy::compile(&config)));
        self.policy_doc = Some(config);

        if !self.tunnel_binary.exists() {
            warn!(path = %self.tunnel_binary.display(), "tunnel binary missing; peer bootstrap is out of scope, continuing without a tunnel");
        } else {
            let args = self.participant_tunnel_args();
            if let Err(e) = self.participant_tunnel.start(TunnelMode::Participant, &args).await {
                warn!(error = %e, "failed to start participant tunnel");
            }
        }
        Ok(PeerState::Discovery)
    }

    async fn handle_discovery(&mut self) -> anyhow::Result<PeerState> {
        match self.session_client.get_status().await {
            Ok(status) if status.is_locked => {
                if status.host_id.as_deref() == Some(self.settings.host_id.as_str()) {
                    Ok(PeerState::PreHostSync)
                } else {
                    Ok(PeerState::Participant)
                }
            }
            Ok(_unlocked) => Ok(PeerState::PreHostSync),
            Err(_) => {
                tokio::time::sleep(UNREACHABLE_POLL).await;
                Ok(PeerState::Discovery)
            }
        }
    }

    async fn handle_participant(&mut self) -> anyhow::Result<PeerState> {
        let engine = self.presync_engine();
        if let Err(e) = engine.sync_from_server().await {
            warn!(error = %e, "participant sync failed, returning to discovery");
            return Ok(PeerState::Discovery);
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        let status = self.session_client.get_status().await?;
        if status.is_locked && status.host_id.as_deref() != Some(self.settings.host_id.as_str()) {
            Ok(PeerState::Participant)
        } else {
            Ok(PeerState::Discovery)
        }
    }

    async fn handle_pre_host_sync(&mut self) -> anyhow::Result<PeerState> {
        let engine = self.presync_engine();
        match engine.sync_from_server().await {
            Ok(outcome) if outcome.is_synced => {
                info!(downloaded = outcome.downloaded, "pre-host sync converged");
                Ok(PeerState::ClaimHost)
            }
            Ok(_) => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(PeerState::PreHostSync)
            }
            Err(e) => {
                warn!(error = %e, "pre-host sync failed, retrying");
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(PeerState::PreHostSync)
            }
        }
    }

    async fn handle_claim_host(&mut self) -> anyhow::Result<PeerState> {
        match self.session_client.try_claim(&self.settings.host_id).await {
            Ok(claim) => {
                self.pending_claim = Some(claim);
                // mutually exclusive with the host-mode tunnel handle_hosting starts next (spec §4.9).
                self.participant_tunnel.stop().await;
                Ok(PeerState::Hosting)
            }
            Err(e) if e.kind() == ErrorKind::Conflict => {
                info!("lost the claim race, returning to discovery");
                Ok(PeerState::Discovery)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// HOSTING (spec §4.6): starts Uploader+Watcher, workload, host-mode tunnel, then supervises
    /// them until the heartbeat monitor reports lease loss or the workload dies twice.
    async fn handle_hosting(&mut self) -> anyhow::Result<PeerState> {
        let claim = self
            .pending_claim
            .take()
            .expect("CLAIM_HOST always populates pending_claim before transitioning to HOSTING");
        let token = claim.token;

        let policy = self.policy.clone().expect("policy loaded by INIT");
        let policy_doc = self.policy_doc.clone().expect("policy loaded by INIT");
        let processing_context = ProcessingContext::new();
        let uploader = Uploader::new(
            self.session_client.clone(),
            self.settings.watch_dir.clone(),
            policy.clone(),
            processing_context.clone(),
            token.clone(),
        );
        let watcher = WriteWatcher::start(
            self.settings.watch_dir.clone(),
            policy.clone(),
            processing_context.clone(),
            uploader.clone(),
        )?;

        let workload = WorkloadSupervisor::new(
            self.settings.watch_dir.clone(),
            policy_doc
                .start_command
                .clone()
                .unwrap_or_else(|| "java -jar server.jar nogui".to_string()),
            self.tracker.clone(),
        );
        workload.start().await?;
        if !workload.wait_until_ready().await {
            warn!("workload did not report ready within the timeout, proceeding anyway");
        }

        let tunnel = TunnelClient::new(self.tunnel_binary.clone(), self.tracker.clone());
        let tunnel_args = self.host_tunnel_args();
        tunnel.start(TunnelMode::Host, &tunnel_args).await?;

        let (lost_tx, mut lost_rx) = watch::channel(false);
        let heartbeat_handle = tokio::spawn(heartbeat_monitor(
            self.session_client.clone(),
            token.clone(),
            claim.heartbeat_interval_secs,
            lost_tx,
        ));

        let mut restarted = false;
        let lost_lease = loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    if !workload.is_alive().await {
                        if restarted {
                            warn!("workload died twice, abandoning hosting");
                            break false;
                        }
                        warn!("workload died, attempting one restart");
                        restarted = true;
                        if workload.start().await.is_err() {
                            break false;
                        }
                    }
                }
                _ = lost_rx.changed() => {
                    if *lost_rx.borrow() {
                        warn!("heartbeat reported lease loss");
                        break true;
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested while hosting, relinquishing");
                    break false;
                }
            }
        };

        // Graceful relinquish (spec §4.6), strictly ordered. In offline/lost-lease mode there is
        // no authorization left to drain/final-sync/release against, so those steps are skipped —
        // step 2 (workload stop) still runs so local state is consistent for the next claim.
        tunnel.stop().await; // 1. stop host-mode tunnel
        workload.stop_gracefully().await; // 2. stop workload gracefully

        if lost_lease {
            heartbeat_handle.abort();
            watcher.cancel_all().await;
        } else {
            let drained = watcher.drain(UPLOAD_DRAIN_TIMEOUT).await; // 3. drain pending uploads
            if !drained {
                warn!("pending uploads did not drain within the timeout, proceeding with relinquish");
            }
            if let Err(e) = uploader.final_sync().await {
                // 4. final sync
                warn!(error = %e, "final sync before relinquish failed");
            }
            heartbeat_handle.abort(); // 5. stop heartbeat
            let _ = self.session_client.release(&token).await; // 6. release
        }
        watcher.stop(); // 7. stop watcher/uploader

        if let Err(e) = self.start_participant_tunnel().await {
            warn!(error = %e, "failed to resume participant tunnel after hosting ended");
        }

        Ok(PeerState::Discovery)
    }

    fn host_tunnel_args(&self) -> Vec<String> {
        let policy_doc = self.policy_doc.as_ref().expect("policy loaded by INIT");
        vec![
            "tunnel".to_string(),
            "run".to_string(),
            policy_doc.tunnel_name.clone().unwrap_or_default(),
        ]
    }

    fn participant_tunnel_args(&self) -> Vec<String> {
        let policy_doc = self.policy_doc.as_ref().expect("policy loaded by INIT");
        vec![
            "access".to_string(),
            "tcp".to_string(),
            policy_doc.tunnel_name.clone().unwrap_or_default(),
        ]
    }

    async fn start_participant_tunnel(&self) -> peerhost_common::Result<()> {
        if !self.tunnel_binary.exists() {
            return Ok(());
        }
        let args = self.participant_tunnel_args();
        self.participant_tunnel.start(TunnelMode::Participant, &args).await
    }

    fn presync_engine(&self) -> PreSyncEngine {
        let policy = self.policy.clone().expect("policy loaded by INIT");
        let policy_doc = self.policy_doc.clone().expect("policy loaded by INIT");
        PreSyncEngine::new(
            self.session_client.clone(),
            self.settings.watch_dir.clone(),
            policy,
            policy_doc.mirror_sync,
        )
    }
}

/// Independent heartbeat task (spec §4.6): sleeps `heartbeat_interval`, heartbeats, and signals
/// the HOSTING handler on a 401 (lease lost, no release attempted) or N consecutive transport
/// failures.
async fn heartbeat_monitor(
    client: Arc<SessionClient>,
    token: String,
    heartbeat_interval_secs: u64,
    lost_tx: watch::Sender<bool>,
) {
    let mut consecutive_failures = 0u32;
    loop {
        tokio::time::sleep(Duration::from_secs(heartbeat_interval_secs)).await;
        match client.heartbeat(&token).await {
            Ok(_) => {
                consecutive_failures = 0;
            }
            Err(e) if e.kind() == ErrorKind::SessionLost || e.kind() == ErrorKind::Unauthorized => {
                let _ = lost_tx.send(true);
                return;
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(error = %e, consecutive_failures, "heartbeat failed");
                if consecutive_failures >= CONSECUTIVE_FAILURE_LIMIT {
                    info!("entering offline mode after repeated heartbeat failures");
                    let _ = lost_tx.send(true);
                    return;
                }
            }
        }
    }
}
