//! Heartbeat liveness monitoring.
//!
//! Every inbound frame refreshes a session's liveness. On each tick the
//! monitor either evicts a session that has been idle longer than the
//! timeout or sends it a `ping` envelope.

use std::sync::Arc;
use std::time::Duration;

use relay_core::Envelope;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use super::connection::{SendOutcome, Session};

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The session was idle past the timeout.
    TimedOut,
    /// The session was closed elsewhere.
    Cancelled,
    /// The session's outbound queue is gone.
    Disconnected,
}

/// Run the heartbeat for `session` until it times out, closes, or its
/// writer disappears.
///
/// The first tick fires one `interval` after start.
pub async fn run_heartbeat(
    session: Arc<Session>,
    interval: Duration,
    timeout: Duration,
) -> HeartbeatResult {
    let cancel = session.cancel_token();
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            _ = ticker.tick() => {
                let idle = session.idle();
                if idle > timeout {
                    debug!(session_id = %session.id, idle_ms = idle.as_millis(), "heartbeat timed out");
                    return HeartbeatResult::TimedOut;
                }
                match session.send_envelope(&Envelope::ping()) {
                    SendOutcome::Queued => {}
                    SendOutcome::Dropped => {
                        debug!(session_id = %session.id, "heartbeat ping dropped, queue full");
                    }
                    SendOutcome::Closed => return HeartbeatResult::Disconnected,
                }
            }
        }
    }
}
