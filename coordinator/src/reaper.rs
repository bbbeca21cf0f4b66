//! Expiry Reaper (spec §2, §4.1): a background task that periodically forces lazy expiry so an
//! idle coordinator (no incoming requests) still releases a dead lease.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::state::AppState;

pub async fn run(state: Arc<AppState>, period: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = state.lease_manager.get().await {
                    error!(error = %e, "expiry reaper tick failed");
                }
            }
            _ = shutdown.changed() => {
                info!("expiry reaper shutting down");
                break;
            }
        }
    }
}
