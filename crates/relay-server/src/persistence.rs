//! Background snapshot writer.
//!
//! Membership mutations hand the latest [`RoomSnapshot`] to a `watch`
//! channel and return immediately. A single task writes whatever value is
//! current on the blocking pool, so bursts coalesce and the last writer wins.
//! Store failures are logged and counted, never surfaced to the mutation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use relay_store::{RoomSnapshot, SnapshotStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::metrics::{SNAPSHOT_FAILURES_TOTAL, SNAPSHOT_SAVES_TOTAL};

#[derive(Debug, Default)]
struct WriterStats {
    saved: AtomicU64,
    failed: AtomicU64,
}

/// Hands snapshots to the writer task.
pub struct SnapshotWriter {
    tx: Mutex<Option<watch::Sender<Option<RoomSnapshot>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<WriterStats>,
}

impl SnapshotWriter {
    /// Start the writer task for `store`. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn SnapshotStore>) -> Self {
        let (tx, rx) = watch::channel(None);
        let stats = Arc::new(WriterStats::default());
        let task = tokio::spawn(run_writer(rx, store, stats.clone()));
        Self {
            tx: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
            stats,
        }
    }

    /// Replace the pending snapshot. No-op after [`SnapshotWriter::close`].
    pub fn submit(&self, snapshot: RoomSnapshot) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send_replace(Some(snapshot));
        }
    }

    /// Latest submitted snapshot, whether or not it has been written.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> Option<RoomSnapshot> {
        self.tx.lock().as_ref().and_then(|tx| tx.borrow().clone())
    }

    /// Successful writes so far.
    pub fn saved(&self) -> u64 {
        self.stats.saved.load(Ordering::Relaxed)
    }

    /// Failed writes so far.
    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// Stop accepting snapshots, write the pending one, and wait up to
    /// `timeout` for the task to finish.
    pub async fn close(&self, timeout: Duration) {
        drop(self.tx.lock().take());
        let task = self.task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!("snapshot writer did not finish within {timeout:?}");
            }
        }
    }
}

async fn run_writer(
    mut rx: watch::Receiver<Option<RoomSnapshot>>,
    store: Arc<dyn SnapshotStore>,
    stats: Arc<WriterStats>,
) {
    while rx.changed().await.is_ok() {
        let Some(snapshot) = rx.borrow_and_update().clone() else {
            continue;
        };
        let rooms = snapshot.rooms.len();
        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => {
                let _ = stats.saved.fetch_add(1, Ordering::Relaxed);
                counter!(SNAPSHOT_SAVES_TOTAL).increment(1);
                debug!(rooms, "room snapshot saved");
            }
            Ok(Err(e)) => {
                let _ = stats.failed.fetch_add(1, Ordering::Relaxed);
                counter!(SNAPSHOT_FAILURES_TOTAL).increment(1);
                warn!(rooms, error = %e, "failed to save room snapshot");
            }
            Err(e) => {
                let _ = stats.failed.fetch_add(1, Ordering::Relaxed);
                counter!(SNAPSHOT_FAILURES_TOTAL).increment(1);
                error!(error = %e, "snapshot write task panicked");
            }
        }
    }
    debug!("snapshot writer stopped");
}
