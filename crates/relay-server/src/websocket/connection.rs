//! Per-connection session state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use relay_core::{Envelope, SessionId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Result of enqueueing one frame for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame is in the session's outbound queue.
    Queued,
    /// The queue was full; the frame was dropped for this session only.
    Dropped,
    /// The session's writer is gone.
    Closed,
}

/// One connected client.
///
/// The socket's write half belongs to the session's writer task; everything
/// else reaches the client through [`Session::send`].
pub struct Session {
    /// Unique session id.
    pub id: SessionId,
    /// User the client identified as (or a generated anonymous id).
    pub user_id: String,
    rooms: Mutex<BTreeSet<String>>,
    tx: mpsc::Sender<Arc<str>>,
    /// When the session was created.
    pub connected_at: Instant,
    last_seen: Mutex<Instant>,
    /// Frames dropped because the outbound queue was full.
    pub dropped_messages: AtomicU64,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session writing into `tx`.
    pub fn new(id: SessionId, user_id: impl Into<String>, tx: mpsc::Sender<Arc<str>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            user_id: user_id.into(),
            rooms: Mutex::new(BTreeSet::new()),
            tx,
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Create a session with a fresh bounded queue of `capacity` frames.
    pub fn with_queue(
        id: SessionId,
        user_id: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, user_id, tx), rx)
    }

    /// Enqueue a serialized frame without waiting.
    pub fn send(&self, frame: Arc<str>) -> SendOutcome {
        if self.cancel.is_cancelled() {
            return SendOutcome::Closed;
        }
        match self.tx.try_send(frame) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Serialize and enqueue an envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> SendOutcome {
        match envelope.encode() {
            Ok(json) => self.send(Arc::from(json)),
            Err(e) => {
                warn!(session_id = %self.id, kind = %envelope.kind, error = %e, "failed to encode envelope");
                SendOutcome::Dropped
            }
        }
    }

    /// Total frames dropped for this session.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity (or creation).
    pub fn idle(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Session age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Rooms this session belongs to.
    pub fn rooms(&self) -> Vec<String> {
        self.rooms.lock().iter().cloned().collect()
    }

    /// Whether the session belongs to `room`.
    pub fn is_member(&self, room: &str) -> bool {
        self.rooms.lock().contains(room)
    }

    pub(crate) fn add_room(&self, room: &str) -> bool {
        self.rooms.lock().insert(room.to_owned())
    }

    pub(crate) fn remove_room(&self, room: &str) -> bool {
        self.rooms.lock().remove(room)
    }

    pub(crate) fn clear_rooms(&self) {
        self.rooms.lock().clear();
    }

    /// Token cancelled when the session closes.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Close the session: its writer stops and its tasks wind down.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether [`Session::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("rooms", &*self.rooms.lock())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
