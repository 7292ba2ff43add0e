//! Server-wide stop signal and tracking of the tasks that must drain on stop.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Stop signal shared by the listener and the `/ws` gate, plus the tasks
/// that have to finish before the process exits.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
    aborts: Mutex<Vec<AbortHandle>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no tracked tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn `task` and wait for it in [`ShutdownCoordinator::drain`].
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.tracker.spawn(task);
        self.aborts.lock().push(handle.abort_handle());
        handle
    }

    /// Tracked tasks still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Start shutdown and wait up to `timeout` for every tracked task.
    ///
    /// Returns `false` if the wait timed out; the stragglers are aborted.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.shutdown();
        let _ = self.tracker.close();
        info!(pending = self.pending(), ?timeout, "draining server tasks");

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            return true;
        }
        warn!(pending = self.pending(), "drain timed out, aborting remaining tasks");
        for abort in self.aborts.lock().drain(..) {
            abort.abort();
        }
        false
    }
}
