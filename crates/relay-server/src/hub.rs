//! The realtime hub: owner of all sessions and rooms.
//!
//! The session table and the room registry live behind one mutex. Every
//! membership mutation goes through [`Hub::join`], [`Hub::leave`] or
//! [`Hub::remove_session`]; fan-out targets are collected under the lock and
//! frames are enqueued after it is released. Nothing awaits while the lock
//! is held.
//!
//! Snapshots are handed to the writer before the lock is released, so the
//! order of submitted snapshots is the order of the mutations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use relay_core::{DataChange, Envelope, SessionId, UserStatus};
use relay_store::{RoomSnapshot, SnapshotStore};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::metrics::{
    DATA_CHANGES_TOTAL, ROOM_JOINS_TOTAL, ROOM_LEAVES_TOTAL, ROOMS_ACTIVE, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL,
    WS_HEARTBEAT_EVICTIONS_TOTAL,
};
use crate::persistence::SnapshotWriter;
use crate::websocket::broadcast::{self, BroadcastReport};
use crate::websocket::connection::{SendOutcome, Session};
use crate::websocket::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::websocket::registry::{JoinOutcome, LeaveOutcome, RoomRegistry};

/// Room used by `publish` when none is given.
pub const DEFAULT_ROOM: &str = "default";

/// How long shutdown waits for the final snapshot write.
const SNAPSHOT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Limits and timings of a hub.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Maximum live sessions (`0` = unlimited).
    pub max_connections: usize,
    /// Outbound frames buffered per session.
    pub send_queue_capacity: usize,
    /// Time between heartbeat ticks.
    pub heartbeat_interval: Duration,
    /// Idle time after which a session is evicted.
    pub heartbeat_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            send_queue_capacity: 256,
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(30),
        }
    }
}

/// One room in [`HubStatus`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    /// Room name.
    pub name: String,
    /// Live members.
    pub member_count: usize,
}

/// Point-in-time view of the hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatus {
    /// Live sessions.
    pub active_sessions: usize,
    /// Rooms with at least one member.
    pub active_rooms: usize,
    /// Per-room member counts, in name order.
    pub rooms: Vec<RoomStatus>,
    /// Rooms recorded by the previous run. Informational only.
    pub restored_rooms: Vec<String>,
}

/// Sink for record-change notifications from the CRUD layer.
pub trait ChangeNotifier: Send + Sync {
    /// Fan `change` out to the subscribers of its table. Fire-and-forget.
    fn notify(&self, change: &DataChange);
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<SessionId, Arc<Session>>,
    rooms: RoomRegistry,
}

impl HubState {
    fn sessions_in(&self, room: &str) -> Vec<Arc<Session>> {
        self.rooms
            .members_of(room)
            .iter()
            .filter_map(|id| self.sessions.get(id).cloned())
            .collect()
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_room_gauge(&self) {
        gauge!(ROOMS_ACTIVE).set(self.rooms.room_count() as f64);
    }
}

/// Composition root for sessions, rooms, heartbeat and persistence.
pub struct Hub {
    state: Mutex<HubState>,
    config: HubConfig,
    snapshots: SnapshotWriter,
    restored_rooms: Vec<String>,
    accepting: AtomicBool,
}

impl Hub {
    /// Create a hub persisting to `store`.
    ///
    /// The stored snapshot, if any, is read once. Its room names are exposed
    /// through [`Hub::restored_rooms`]; its session ids belong to dead
    /// connections and never enter the live registry. Must be called inside
    /// a Tokio runtime.
    pub fn new(config: HubConfig, store: Arc<dyn SnapshotStore>) -> Arc<Self> {
        let restored_rooms = match store.load() {
            Ok(Some(snapshot)) => {
                info!(
                    rooms = snapshot.rooms.len(),
                    saved_at = snapshot.saved_at,
                    "restored room snapshot"
                );
                snapshot.room_names()
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "failed to load room snapshot, starting empty");
                Vec::new()
            }
        };

        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            config,
            snapshots: SnapshotWriter::spawn(store),
            restored_rooms,
            accepting: AtomicBool::new(true),
        })
    }

    /// Hub limits.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Whether a new session would be accepted right now.
    pub fn has_capacity(&self) -> bool {
        self.check_admission().is_ok()
    }

    /// Why a new session would be refused right now, if it would be.
    pub fn check_admission(&self) -> Result<(), HubError> {
        if !self.is_accepting() {
            return Err(HubError::ShuttingDown);
        }
        let max = self.config.max_connections;
        if max > 0 && self.state.lock().sessions.len() >= max {
            return Err(HubError::CapacityReached(max));
        }
        Ok(())
    }

    /// Whether the hub still accepts sessions.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Register a new session for `user_id` and start its heartbeat.
    ///
    /// The returned receiver carries the session's outbound frames; the
    /// first one is a `user_status` `connected` envelope.
    pub fn connect(
        self: &Arc<Self>,
        user_id: impl Into<String>,
    ) -> Result<(Arc<Session>, mpsc::Receiver<Arc<str>>), HubError> {
        if !self.is_accepting() {
            return Err(HubError::ShuttingDown);
        }
        let (session, rx) =
            Session::with_queue(SessionId::new(), user_id, self.config.send_queue_capacity);
        let session = Arc::new(session);

        let active = {
            let mut state = self.state.lock();
            if self.config.max_connections > 0
                && state.sessions.len() >= self.config.max_connections
            {
                return Err(HubError::CapacityReached(self.config.max_connections));
            }
            let _ = state.sessions.insert(session.id.clone(), session.clone());
            state.sessions.len()
        };

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(session_id = %session.id, user_id = %session.user_id, active, "session connected");

        let _ = broadcast::send_to_session(
            &session,
            &Envelope::connected(session.id.as_str(), &session.user_id),
        );
        self.spawn_supervisor(session.clone());
        Ok((session, rx))
    }

    fn spawn_supervisor(self: &Arc<Self>, session: Arc<Session>) {
        let hub: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.heartbeat_interval;
        let timeout = self.config.heartbeat_timeout;
        let _ = tokio::spawn(async move {
            let result = run_heartbeat(session.clone(), interval, timeout).await;
            let Some(hub) = hub.upgrade() else { return };
            match result {
                HeartbeatResult::TimedOut => {
                    info!(session_id = %session.id, "evicting unresponsive session");
                    counter!(WS_HEARTBEAT_EVICTIONS_TOTAL).increment(1);
                    let _ = hub.remove_session(&session.id);
                }
                HeartbeatResult::Disconnected => {
                    let _ = hub.remove_session(&session.id);
                }
                HeartbeatResult::Cancelled => {}
            }
        });
    }

    /// Live session by id.
    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.state.lock().sessions.get(id).cloned()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Number of rooms.
    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.room_count()
    }

    /// Members of `room`.
    pub fn members_of(&self, room: &str) -> Vec<SessionId> {
        self.state.lock().rooms.members_of(room)
    }

    /// Add a session to `room`.
    ///
    /// A new membership is persisted and announced to the other members as
    /// `user_status` `joined`. Joining a room twice changes nothing.
    pub fn join(&self, session_id: &SessionId, room: &str) -> Result<JoinOutcome, HubError> {
        let (session, outcome, targets) = {
            let mut state = self.state.lock();
            let session = state
                .sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| HubError::UnknownSession(session_id.clone()))?;
            let outcome = state.rooms.join(session_id, room);
            if !outcome.is_new() {
                return Ok(outcome);
            }
            let _ = session.add_room(room);
            state.record_room_gauge();
            self.snapshots.submit(state.rooms.snapshot());
            (session, outcome, state.sessions_in(room))
        };

        counter!(ROOM_JOINS_TOTAL).increment(1);
        debug!(session_id = %session_id, room, members = outcome.member_count(), "joined room");
        let _ = self.fan_out(
            &targets,
            &Envelope::user_status(room, &session.user_id, UserStatus::Joined),
            Some(session_id),
        );
        Ok(outcome)
    }

    /// Remove a session from `room`.
    ///
    /// A removed membership is persisted and announced to the remaining
    /// members as `user_status` `left`. Leaving a room the session is not in
    /// changes nothing.
    pub fn leave(&self, session_id: &SessionId, room: &str) -> Result<LeaveOutcome, HubError> {
        let (session, outcome, targets) = {
            let mut state = self.state.lock();
            let session = state
                .sessions
                .get(session_id)
                .cloned()
                .ok_or_else(|| HubError::UnknownSession(session_id.clone()))?;
            let outcome = state.rooms.leave(session_id, room);
            if outcome == LeaveOutcome::NotMember {
                return Ok(outcome);
            }
            let _ = session.remove_room(room);
            state.record_room_gauge();
            self.snapshots.submit(state.rooms.snapshot());
            (session, outcome, state.sessions_in(room))
        };

        counter!(ROOM_LEAVES_TOTAL).increment(1);
        debug!(session_id = %session_id, room, "left room");
        let _ = self.fan_out(
            &targets,
            &Envelope::user_status(room, &session.user_id, UserStatus::Left),
            Some(session_id),
        );
        Ok(outcome)
    }

    /// Remove a session from the hub and from every room, and close it.
    ///
    /// Each room that still has members receives one `user_status`
    /// `disconnected`. Returns `false` if the session was already gone.
    pub fn remove_session(&self, session_id: &SessionId) -> bool {
        let (session, notices) = {
            let mut state = self.state.lock();
            let Some(session) = state.sessions.remove(session_id) else {
                return false;
            };
            let affected = state.rooms.remove_session(session_id);
            session.clear_rooms();
            let notices: Vec<(String, Vec<Arc<Session>>)> = affected
                .iter()
                .filter(|room| state.rooms.contains(room))
                .map(|room| (room.clone(), state.sessions_in(room)))
                .collect();
            if !affected.is_empty() {
                self.snapshots.submit(state.rooms.snapshot());
            }
            state.record_room_gauge();
            (session, notices)
        };

        session.close();
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(session.age().as_secs_f64());
        info!(
            session_id = %session_id,
            user_id = %session.user_id,
            rooms = notices.len(),
            dropped = session.drop_count(),
            "session removed"
        );

        for (room, targets) in notices {
            let notice = Envelope::user_status(&room, &session.user_id, UserStatus::Disconnected);
            let _ = self.fan_out(&targets, &notice, None);
        }
        true
    }

    /// Enqueue `envelope` for one session. A closed session is removed.
    pub fn send_to_session(&self, session: &Session, envelope: &Envelope) -> SendOutcome {
        let outcome = broadcast::send_to_session(session, envelope);
        if outcome == SendOutcome::Closed {
            let _ = self.remove_session(&session.id);
        }
        outcome
    }

    /// Enqueue `envelope` for every member of `room` except `exclude`.
    pub fn broadcast_to_room(
        &self,
        room: &str,
        envelope: &Envelope,
        exclude: Option<&SessionId>,
    ) -> BroadcastReport {
        let targets = self.state.lock().sessions_in(room);
        self.fan_out(&targets, envelope, exclude)
    }

    /// Fan out, then remove the targets whose writer turned out to be gone.
    fn fan_out(
        &self,
        targets: &[Arc<Session>],
        envelope: &Envelope,
        exclude: Option<&SessionId>,
    ) -> BroadcastReport {
        let report = broadcast::broadcast_to_room(targets, envelope, exclude);
        for id in &report.closed {
            let _ = self.remove_session(id);
        }
        report
    }

    /// Send a `data_change` for `table` to room `table_<table>`.
    pub fn notify_data_change(
        &self,
        table: &str,
        action: &str,
        record_id: Option<&str>,
        data: Option<Value>,
    ) -> BroadcastReport {
        let mut change = DataChange::new(table, action);
        change.record_id = record_id.map(str::to_owned);
        change.data = data;
        self.dispatch_change(&change)
    }

    fn dispatch_change(&self, change: &DataChange) -> BroadcastReport {
        let room = change.room();
        let report = self.broadcast_to_room(&room, &change.to_envelope(), None);
        counter!(DATA_CHANGES_TOTAL, "action" => change.action.clone()).increment(1);
        debug!(
            table = %change.table,
            action = %change.action,
            room = %room,
            delivered = report.delivered,
            "data change dispatched"
        );
        report
    }

    /// Send a server-originated `message` envelope to `room`.
    pub fn publish(&self, room: &str, message: Value) -> BroadcastReport {
        self.broadcast_to_room(room, &Envelope::chat(room, None, Some(message)), None)
    }

    /// Room names recorded by the previous run.
    pub fn restored_rooms(&self) -> &[String] {
        &self.restored_rooms
    }

    /// Current sessions and rooms.
    pub fn status(&self) -> HubStatus {
        let state = self.state.lock();
        HubStatus {
            active_sessions: state.sessions.len(),
            active_rooms: state.rooms.room_count(),
            rooms: state
                .rooms
                .rooms()
                .map(|(name, member_count)| RoomStatus {
                    name: name.to_owned(),
                    member_count,
                })
                .collect(),
            restored_rooms: self.restored_rooms.clone(),
        }
    }

    /// Current membership as a snapshot.
    pub fn snapshot(&self) -> RoomSnapshot {
        self.state.lock().rooms.snapshot()
    }

    /// Successful and failed snapshot writes so far.
    pub fn snapshot_stats(&self) -> (u64, u64) {
        (self.snapshots.saved(), self.snapshots.failed())
    }

    /// Stop accepting sessions and close every live one.
    ///
    /// The snapshot writer is flushed and closed first, so the stored
    /// snapshot keeps the membership as it was before shutdown.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        self.snapshots.close(SNAPSHOT_FLUSH_TIMEOUT).await;

        let ids: Vec<SessionId> = self.state.lock().sessions.keys().cloned().collect();
        info!(sessions = ids.len(), "closing all sessions");
        for id in &ids {
            let _ = self.remove_session(id);
        }
    }
}

impl ChangeNotifier for Hub {
    fn notify(&self, change: &DataChange) {
        let _ = self.dispatch_change(change);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use relay_core::MessageKind;
    use relay_store::{MemorySnapshotStore, StoreError};
    use serde_json::json;

    use super::*;

    struct FailingStore;

    impl SnapshotStore for FailingStore {
        fn load(&self) -> relay_store::Result<Option<RoomSnapshot>> {
            Err(StoreError::Unavailable("offline".into()))
        }

        fn save(&self, _snapshot: &RoomSnapshot) -> relay_store::Result<()> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    type Client = (Arc<Session>, mpsc::Receiver<Arc<str>>);

    fn hub_with(store: Arc<dyn SnapshotStore>) -> Arc<Hub> {
        Hub::new(HubConfig::default(), store)
    }

    fn hub() -> Arc<Hub> {
        hub_with(Arc::new(MemorySnapshotStore::new()))
    }

    /// Connect and consume the initial `connected` frame.
    fn connect(hub: &Arc<Hub>, user: &str) -> Client {
        let (session, mut rx) = hub.connect(user).unwrap();
        let first = Envelope::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(first.kind, MessageKind::UserStatus);
        (session, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(Envelope::decode(&frame).unwrap());
        }
        out
    }

    fn status_of(env: &Envelope) -> &str {
        env.data.as_ref().unwrap()["status"].as_str().unwrap()
    }

    async fn wait_for_saves(store: &MemorySnapshotStore, n: u64) {
        for _ in 0..200 {
            if store.save_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} snapshot saves, saw {}", store.save_count());
    }

    #[tokio::test]
    async fn connect_sends_connected_frame() {
        let hub = hub();
        let (session, mut rx) = hub.connect("alice").unwrap();
        let env = Envelope::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(env.kind, MessageKind::UserStatus);
        assert_eq!(env.user_id.as_deref(), Some("alice"));
        let data = env.data.unwrap();
        assert_eq!(data["status"], "connected");
        assert_eq!(data["sessionId"], session.id.as_str());
        assert_eq!(hub.session_count(), 1);
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let config = HubConfig {
            max_connections: 1,
            ..HubConfig::default()
        };
        let hub = Hub::new(config, Arc::new(MemorySnapshotStore::new()));
        assert_eq!(hub.check_admission(), Ok(()));
        let _a = hub.connect("a").unwrap();
        assert!(!hub.has_capacity());
        assert_eq!(hub.check_admission(), Err(HubError::CapacityReached(1)));
        assert_eq!(hub.connect("b").unwrap_err(), HubError::CapacityReached(1));
    }

    #[tokio::test]
    async fn join_and_leave_are_idempotent() {
        let hub = hub();
        let (a, _rx) = connect(&hub, "a");

        assert!(hub.join(&a.id, "lobby").unwrap().is_new());
        assert_eq!(
            hub.join(&a.id, "lobby").unwrap(),
            JoinOutcome::AlreadyMember { member_count: 1 }
        );
        assert_eq!(hub.members_of("lobby"), vec![a.id.clone()]);
        assert_eq!(a.rooms(), vec!["lobby"]);

        assert_eq!(hub.leave(&a.id, "lobby").unwrap(), LeaveOutcome::Left { remaining: 0 });
        assert_eq!(hub.leave(&a.id, "lobby").unwrap(), LeaveOutcome::NotMember);
        assert_eq!(hub.room_count(), 0);
        assert!(a.rooms().is_empty());
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let hub = hub();
        let ghost = SessionId::from("sess_ghost");
        assert_eq!(
            hub.join(&ghost, "lobby").unwrap_err(),
            HubError::UnknownSession(ghost.clone())
        );
        assert!(hub.leave(&ghost, "lobby").is_err());
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn join_announces_to_others_only() {
        let hub = hub();
        let (a, mut rx_a) = connect(&hub, "a");
        let (b, mut rx_b) = connect(&hub, "b");
        let _ = hub.join(&a.id, "lobby").unwrap();
        let _ = hub.join(&b.id, "lobby").unwrap();

        let seen_by_a = drain(&mut rx_a);
        assert_eq!(seen_by_a.len(), 1);
        assert_eq!(seen_by_a[0].kind, MessageKind::UserStatus);
        assert_eq!(seen_by_a[0].user_id.as_deref(), Some("b"));
        assert_eq!(status_of(&seen_by_a[0]), "joined");
        assert!(drain(&mut rx_b).is_empty());

        // Repeated join: nothing broadcast.
        let _ = hub.join(&b.id, "lobby").unwrap();
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn leave_announces_left() {
        let hub = hub();
        let (a, mut rx_a) = connect(&hub, "a");
        let (b, mut rx_b) = connect(&hub, "b");
        let _ = hub.join(&a.id, "lobby").unwrap();
        let _ = hub.join(&b.id, "lobby").unwrap();
        let _ = drain(&mut rx_a);

        let _ = hub.leave(&b.id, "lobby").unwrap();
        let seen = drain(&mut rx_a);
        assert_eq!(seen.len(), 1);
        assert_eq!(status_of(&seen[0]), "left");
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn remove_session_cleans_every_room() {
        let hub = hub();
        let (a, _rx_a) = connect(&hub, "a");
        let (b, mut rx_b) = connect(&hub, "b");
        let (c, mut rx_c) = connect(&hub, "c");
        for room in ["r1", "r2", "solo"] {
            let _ = hub.join(&a.id, room).unwrap();
        }
        let _ = hub.join(&b.id, "r1").unwrap();
        let _ = hub.join(&b.id, "r2").unwrap();
        let _ = hub.join(&c.id, "r2").unwrap();
        let _ = drain(&mut rx_b);
        let _ = drain(&mut rx_c);

        assert!(hub.remove_session(&a.id));
        assert!(a.is_closed());
        assert!(!hub.remove_session(&a.id));

        assert_eq!(hub.session_count(), 2);
        assert!(hub.members_of("solo").is_empty());
        assert_eq!(hub.room_count(), 2);
        for room in ["r1", "r2"] {
            assert!(!hub.members_of(room).contains(&a.id));
        }

        // One disconnected notice per surviving room.
        let b_seen = drain(&mut rx_b);
        assert_eq!(b_seen.len(), 2);
        assert!(b_seen.iter().all(|e| status_of(e) == "disconnected"));
        let c_seen = drain(&mut rx_c);
        assert_eq!(c_seen.len(), 1);
        assert_eq!(c_seen[0].room.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let hub = hub();
        let (a, mut rx_a) = connect(&hub, "a");
        let (b, mut rx_b) = connect(&hub, "b");
        let _ = hub.join(&a.id, "lobby").unwrap();
        let _ = hub.join(&b.id, "lobby").unwrap();
        let _ = drain(&mut rx_a);

        let env = Envelope::chat("lobby", Some("a"), Some(json!("hi")));
        let report = hub.broadcast_to_room("lobby", &env, Some(&a.id));
        assert_eq!(report.delivered, 1);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn closed_targets_are_removed_after_broadcast() {
        let hub = hub();
        let (a, rx_a) = connect(&hub, "a");
        let (b, mut rx_b) = connect(&hub, "b");
        let _ = hub.join(&a.id, "lobby").unwrap();
        let _ = hub.join(&b.id, "lobby").unwrap();
        drop(rx_a);

        let report = hub.publish("lobby", json!({"text": "hello"}));
        assert_eq!(report.closed, vec![a.id.clone()]);
        assert!(hub.session(&a.id).is_none());
        assert_eq!(hub.members_of("lobby"), vec![b.id.clone()]);

        let seen = drain(&mut rx_b);
        assert_eq!(seen[0].kind, MessageKind::Message);
        assert_eq!(status_of(&seen[1]), "disconnected");
    }

    #[tokio::test]
    async fn data_change_reaches_table_subscribers() {
        let hub = hub();
        let (a, mut rx_a) = connect(&hub, "a");
        let (b, mut rx_b) = connect(&hub, "b");
        let (_c, mut rx_c) = connect(&hub, "c");
        let _ = hub.join(&a.id, "table_orders").unwrap();
        let _ = hub.join(&b.id, "table_orders").unwrap();
        let _ = drain(&mut rx_a);

        let report =
            hub.notify_data_change("orders", "update", Some("42"), Some(json!({"status": "shipped"})));
        assert_eq!(report.delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let seen = drain(rx);
            assert_eq!(seen.len(), 1);
            let env = &seen[0];
            assert_eq!(env.kind, MessageKind::DataChange);
            assert_eq!(env.room.as_deref(), Some("table_orders"));
            let data = env.data.as_ref().unwrap();
            assert_eq!(data["table"], "orders");
            assert_eq!(data["action"], "update");
            assert_eq!(data["recordId"], "42");
            assert_eq!(data["data"]["status"], "shipped");
        }
        assert!(drain(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn change_notifier_trait_dispatches() {
        let hub = hub();
        let (a, mut rx_a) = connect(&hub, "a");
        let _ = hub.join(&a.id, "table_users").unwrap();
        let notifier: &dyn ChangeNotifier = hub.as_ref();
        notifier.notify(&DataChange::new("users", "batch_delete"));
        let seen = drain(&mut rx_a);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data.as_ref().unwrap()["action"], "batch_delete");
    }

    #[tokio::test]
    async fn notify_without_subscribers_is_silent() {
        let hub = hub();
        let report = hub.notify_data_change("orders", "create", None, None);
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn status_reports_rooms() {
        let hub = hub();
        let (a, _rx_a) = connect(&hub, "a");
        let (b, _rx_b) = connect(&hub, "b");
        let _ = hub.join(&a.id, "b-room").unwrap();
        let _ = hub.join(&a.id, "a-room").unwrap();
        let _ = hub.join(&b.id, "a-room").unwrap();

        let status = hub.status();
        assert_eq!(status.active_sessions, 2);
        assert_eq!(status.active_rooms, 2);
        assert_eq!(
            status.rooms,
            vec![
                RoomStatus { name: "a-room".into(), member_count: 2 },
                RoomStatus { name: "b-room".into(), member_count: 1 },
            ]
        );
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["activeSessions"], 2);
        assert_eq!(json["rooms"][0]["memberCount"], 2);
        assert!(json["restoredRooms"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn membership_changes_are_persisted() {
        let store = Arc::new(MemorySnapshotStore::new());
        let hub = hub_with(store.clone());
        let (a, _rx) = connect(&hub, "a");

        let _ = hub.join(&a.id, "lobby").unwrap();
        wait_for_saves(&store, 1).await;
        let saved = store.latest().unwrap();
        assert!(saved.rooms["lobby"].contains(a.id.as_str()));

        let _ = hub.leave(&a.id, "lobby").unwrap();
        wait_for_saves(&store, 2).await;
        assert!(store.latest().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_join_does_not_persist() {
        let store = Arc::new(MemorySnapshotStore::new());
        let hub = hub_with(store.clone());
        let (a, _rx) = connect(&hub, "a");
        let _ = hub.join(&a.id, "lobby").unwrap();
        wait_for_saves(&store, 1).await;
        let _ = hub.join(&a.id, "lobby").unwrap();
        let _ = hub.leave(&a.id, "elsewhere").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn store_failure_does_not_fail_mutations() {
        let hub = hub_with(Arc::new(FailingStore));
        let (a, _rx) = connect(&hub, "a");
        assert!(hub.join(&a.id, "lobby").unwrap().is_new());
        assert_eq!(hub.members_of("lobby"), vec![a.id.clone()]);
        assert!(matches!(hub.leave(&a.id, "lobby").unwrap(), LeaveOutcome::Left { .. }));
        assert!(hub.restored_rooms().is_empty());

        for _ in 0..200 {
            if hub.snapshot_stats().1 > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(hub.snapshot_stats().1 > 0);
        assert_eq!(hub.snapshot_stats().0, 0);
    }

    #[tokio::test]
    async fn restore_exposes_room_names_only() {
        let mut rooms = BTreeMap::new();
        let _ = rooms.insert("table_orders".to_string(), ["sess_stale".to_string()].into());
        let store = Arc::new(MemorySnapshotStore::with_snapshot(RoomSnapshot::new(rooms)));
        let hub = hub_with(store.clone());

        assert_eq!(hub.restored_rooms(), ["table_orders".to_string()]);
        assert_eq!(hub.room_count(), 0);
        assert!(hub.members_of("table_orders").is_empty());
        assert_eq!(hub.status().restored_rooms, vec!["table_orders"]);

        // The first mutation overwrites the stored snapshot with live state.
        let (a, _rx) = connect(&hub, "a");
        let _ = hub.join(&a.id, "table_orders").unwrap();
        wait_for_saves(&store, 1).await;
        let members = &store.latest().unwrap().rooms["table_orders"];
        assert!(!members.contains("sess_stale"));
        assert!(members.contains(a.id.as_str()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_mutations_persist_final_membership() {
        let store = Arc::new(MemorySnapshotStore::new());
        let hub = hub_with(store.clone());
        let clients: Vec<Client> = (0..4).map(|i| connect(&hub, &format!("u{i}"))).collect();
        let rooms = ["r0", "r1", "r2"];

        std::thread::scope(|scope| {
            for (i, (session, _)) in clients.iter().enumerate() {
                let hub = &hub;
                let _ = scope.spawn(move || {
                    for step in 0..300 {
                        let room = rooms[(i + step) % rooms.len()];
                        if step % 3 == 2 {
                            let _ = hub.leave(&session.id, room).unwrap();
                        } else {
                            let _ = hub.join(&session.id, room).unwrap();
                        }
                    }
                });
            }
        });

        hub.snapshots.close(Duration::from_secs(5)).await;
        assert_eq!(store.latest().unwrap().rooms, hub.snapshot().rooms);
    }

    fn assert_pending_matches(hub: &Hub) {
        let pending = hub.snapshots.pending().expect("snapshot submitted");
        assert_eq!(pending.rooms, hub.snapshot().rooms);
    }

    #[tokio::test]
    async fn each_mutation_leaves_current_snapshot_pending() {
        let hub = hub();
        let (a, _rx_a) = connect(&hub, "a");
        let (b, _rx_b) = connect(&hub, "b");

        let _ = hub.join(&a.id, "lobby").unwrap();
        assert_pending_matches(&hub);
        let _ = hub.join(&b.id, "lobby").unwrap();
        assert_pending_matches(&hub);
        let _ = hub.leave(&a.id, "lobby").unwrap();
        assert_pending_matches(&hub);
        assert!(hub.remove_session(&b.id));
        assert_pending_matches(&hub);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_session_is_evicted_by_heartbeat() {
        let hub = hub();
        let (a, mut rx_a) = connect(&hub, "a");
        let (b, mut rx_b) = connect(&hub, "b");
        let _ = hub.join(&a.id, "lobby").unwrap();
        let _ = hub.join(&b.id, "lobby").unwrap();

        // `b` stays active; `a` goes silent without closing its socket.
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            b.touch();
        }

        assert!(hub.session(&a.id).is_none());
        assert!(a.is_closed());
        assert_eq!(hub.members_of("lobby"), vec![b.id.clone()]);

        let pings_to_a = drain(&mut rx_a)
            .iter()
            .filter(|e| e.kind == MessageKind::Ping)
            .count();
        assert_eq!(pings_to_a, 2);
        let seen_by_b = drain(&mut rx_b);
        assert!(
            seen_by_b
                .iter()
                .any(|e| e.kind == MessageKind::UserStatus && status_of(e) == "disconnected")
        );
    }

    #[tokio::test]
    async fn shutdown_closes_sessions_and_keeps_snapshot() {
        let store = Arc::new(MemorySnapshotStore::new());
        let hub = hub_with(store.clone());
        let (a, _rx) = connect(&hub, "a");
        let _ = hub.join(&a.id, "lobby").unwrap();

        hub.shutdown().await;
        assert!(!hub.is_accepting());
        assert_eq!(hub.check_admission(), Err(HubError::ShuttingDown));
        assert_eq!(hub.session_count(), 0);
        assert!(a.is_closed());
        assert_eq!(hub.connect("late").unwrap_err(), HubError::ShuttingDown);

        // Membership from before shutdown is what the next run restores.
        assert_eq!(store.latest().unwrap().room_names(), vec!["lobby"]);
    }
}
