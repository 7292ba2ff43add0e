//! Envelope fan-out to sessions.
//!
//! Sends never block and never fail the caller. A broadcast serializes the
//! envelope once and reports which targets were closed; removing those is
//! left to the hub after the pass.

use std::sync::Arc;

use metrics::counter;
use relay_core::{Envelope, SessionId};
use tracing::{debug, warn};

use super::connection::{SendOutcome, Session};
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// Result of one fan-out pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Targets the frame was queued for.
    pub delivered: usize,
    /// Targets whose queue was full.
    pub dropped: usize,
    /// Targets whose writer is gone.
    pub closed: Vec<SessionId>,
}

/// Enqueue `envelope` for one session.
pub fn send_to_session(session: &Session, envelope: &Envelope) -> SendOutcome {
    let outcome = session.send_envelope(envelope);
    if outcome == SendOutcome::Dropped {
        counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
        debug!(session_id = %session.id, kind = %envelope.kind, "outbound queue full, frame dropped");
    }
    outcome
}

/// Enqueue `envelope` for every target except `exclude`.
pub fn broadcast_to_room(
    targets: &[Arc<Session>],
    envelope: &Envelope,
    exclude: Option<&SessionId>,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    let frame: Arc<str> = match envelope.encode() {
        Ok(json) => Arc::from(json),
        Err(e) => {
            warn!(kind = %envelope.kind, error = %e, "failed to serialize envelope");
            return report;
        }
    };

    for session in targets {
        if exclude == Some(&session.id) {
            continue;
        }
        match session.send(frame.clone()) {
            SendOutcome::Queued => report.delivered += 1,
            SendOutcome::Dropped => report.dropped += 1,
            SendOutcome::Closed => report.closed.push(session.id.clone()),
        }
    }

    if report.dropped > 0 {
        counter!(WS_BROADCAST_DROPS_TOTAL).increment(u64::try_from(report.dropped).unwrap_or(u64::MAX));
    }
    debug!(
        kind = %envelope.kind,
        room = envelope.room.as_deref().unwrap_or(""),
        delivered = report.delivered,
        dropped = report.dropped,
        closed = report.closed.len(),
        "broadcast"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::MessageKind;
    use tokio::sync::mpsc;

    fn make_session(id: &str, capacity: usize) -> (Arc<Session>, mpsc::Receiver<Arc<str>>) {
        let (session, rx) = Session::with_queue(SessionId::from(id), id, capacity);
        (Arc::new(session), rx)
    }

    fn chat() -> Envelope {
        Envelope::chat("lobby", Some("alice"), Some(serde_json::json!({"text": "hi"})))
    }

    #[tokio::test]
    async fn reaches_every_target() {
        let (a, mut rx_a) = make_session("a", 4);
        let (b, mut rx_b) = make_session("b", 4);
        let report = broadcast_to_room(&[a, b], &chat(), None);
        assert_eq!(report.delivered, 2);
        for rx in [&mut rx_a, &mut rx_b] {
            let env = Envelope::decode(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(env.kind, MessageKind::Message);
            assert_eq!(env.user_id.as_deref(), Some("alice"));
        }
    }

    #[test]
    fn excluded_sender_gets_nothing() {
        let (a, mut rx_a) = make_session("a", 4);
        let (b, mut rx_b) = make_session("b", 4);
        let report = broadcast_to_room(&[a.clone(), b], &chat(), Some(&a.id));
        assert_eq!(report.delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn full_and_closed_targets_are_reported() {
        let (full, _rx_full) = make_session("full", 1);
        assert_eq!(full.send(Arc::from("x")), SendOutcome::Queued);
        let (gone, rx_gone) = make_session("gone", 4);
        drop(rx_gone);
        let (ok, _rx_ok) = make_session("ok", 4);

        let report = broadcast_to_room(&[full.clone(), gone, ok], &chat(), None);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.closed, vec![SessionId::from("gone")]);
        assert_eq!(full.drop_count(), 1);
    }

    #[test]
    fn single_session_send() {
        let (a, mut rx) = make_session("a", 1);
        assert_eq!(send_to_session(&a, &Envelope::ping()), SendOutcome::Queued);
        assert_eq!(send_to_session(&a, &Envelope::ping()), SendOutcome::Dropped);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn empty_target_list() {
        assert_eq!(broadcast_to_room(&[], &chat(), None), BroadcastReport::default());
    }
}
