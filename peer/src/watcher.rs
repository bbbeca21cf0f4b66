//! Write Watcher & Debouncer (spec §4.5): filesystem notifications → per-path debounce → Uploader.
//! Grounded on `original_source/client/services/sync_service.py::FileMonitor`/`DiffManager`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use peerhost_common::policy::CompiledPolicy;

use crate::uploader::{ProcessingContext, Uploader};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Owns the `notify` watcher handle (dropping it stops the subscription) and the debounce
/// consumer task.
pub struct WriteWatcher {
    _watcher: RecommendedWatcher,
    consumer: JoinHandle<()>,
    pending: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl WriteWatcher {
    pub fn start(
        watch_dir: PathBuf,
        policy: Arc<CompiledPolicy>,
        processing_context: Arc<ProcessingContext>,
        uploader: Arc<Uploader>,
    ) -> peerhost_common::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            for path in event.paths {
                let _ = tx.send(path);
            }
        })
        .map_err(|e| peerhost_common::PeerHostError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        watcher
            .watch(&watch_dir, RecursiveMode::Recursive)
            .map_err(|e| peerhost_common::PeerHostError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let pending: Arc<Mutex<HashMap<String, JoinHandle<()>>>> = Arc::new(Mutex::new(HashMap::new()));
        let consumer = tokio::spawn(debounce_consumer(
            rx,
            watch_dir,
            policy,
            processing_context,
            uploader,
            pending.clone(),
        ));

        Ok(Self {
            _watcher: watcher,
            consumer,
            pending,
        })
    }

    /// Cancels every outstanding debounce task without running the pending uploads. Used on the
    /// lease-lost path, where the authorization backing those uploads is already gone; prefer
    /// `drain` on a graceful relinquish so in-flight writes still reach the coordinator.
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.lock().await;
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }

    /// Graceful relinquish step 3 (spec §4.6): awaits every outstanding debounce/upload task
    /// instead of aborting it, up to `timeout` overall. The pending map is the authoritative view
    /// of in-flight work (spec §4.5), so this is the drain step the relinquish sequence needs
    /// before the final sync pass. Returns `false` if the timeout elapsed with tasks still
    /// outstanding.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let handles: Vec<JoinHandle<()>> = self.pending.lock().await.drain().map(|(_, h)| h).collect();
        if handles.is_empty() {
            return true;
        }
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        tokio::time::timeout(timeout, join_all).await.is_ok()
    }

    pub fn stop(self) {
        self.consumer.abort();
    }
}

async fn debounce_consumer(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    watch_dir: PathBuf,
    policy: Arc<CompiledPolicy>,
    processing_context: Arc<ProcessingContext>,
    uploader: Arc<Uploader>,
    pending: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
) {
    while let Some(absolute_path) = rx.recv().await {
        let Ok(relative) = absolute_path.strip_prefix(&watch_dir) else {
            continue;
        };
        let relative_path = relative.to_string_lossy().replace('\\', "/");
        if relative_path.is_empty() || relative_path.starts_with("meta") {
            continue;
        }
        if processing_context.contains(&relative_path).await {
            continue;
        }
        if policy.is_ignored(&relative_path) || policy.is_readonly(&relative_path) {
            continue;
        }

        let mut pending = pending.lock().await;
        if let Some(existing) = pending.remove(&relative_path) {
            existing.abort();
        }

        let uploader = uploader.clone();
        let task_path = relative_path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            if let Err(e) = uploader.upload_path(&task_path).await {
                warn!(path = task_path, error = %e, "debounced upload failed");
            }
        });
        pending.insert(relative_path, handle);
    }
    info!("write watcher channel closed, debounce consumer exiting");
}
