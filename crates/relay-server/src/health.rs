//! `/health` body.

use std::time::Instant;

use serde::Serialize;

use crate::hub::Hub;

/// Liveness summary of the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while accepting sessions, `"draining"` once shutdown began.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live `WebSocket` sessions.
    pub connections: usize,
    /// Rooms with at least one member.
    pub rooms: usize,
}

impl HealthResponse {
    /// Read the counters of `hub`.
    pub fn of(hub: &Hub, started: Instant) -> Self {
        Self {
            status: if hub.is_accepting() { "ok" } else { "draining" },
            uptime_secs: started.elapsed().as_secs(),
            connections: hub.session_count(),
            rooms: hub.room_count(),
        }
    }
}
