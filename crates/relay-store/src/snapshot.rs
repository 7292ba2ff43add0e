//! Snapshot of the room registry and the store abstraction.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StoreError};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Room name → member session ids, as last persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    /// Format version.
    pub version: u32,
    /// Milliseconds since epoch when the snapshot was taken.
    pub saved_at: i64,
    /// Membership at that instant. Rooms are never empty.
    pub rooms: BTreeMap<String, BTreeSet<String>>,
}

impl RoomSnapshot {
    /// Snapshot `rooms` now. Empty member sets are dropped.
    pub fn new(rooms: BTreeMap<String, BTreeSet<String>>) -> Self {
        let rooms = rooms
            .into_iter()
            .filter(|(_, members)| !members.is_empty())
            .collect();
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: relay_core::now_ms(),
            rooms,
        }
    }

    /// Names of the rooms in the snapshot.
    pub fn room_names(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    /// Whether no room is recorded.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Serialize to the stored JSON payload.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored payload, rejecting unknown versions.
    pub fn decode(payload: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(payload)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion(snapshot.version));
        }
        Ok(snapshot)
    }
}

/// Durable home of the latest [`RoomSnapshot`].
///
/// Implementations are synchronous; async callers run them on the blocking
/// pool.
pub trait SnapshotStore: Send + Sync {
    /// Read the stored snapshot, if any.
    fn load(&self) -> Result<Option<RoomSnapshot>>;

    /// Overwrite the stored snapshot.
    fn save(&self, snapshot: &RoomSnapshot) -> Result<()>;
}
