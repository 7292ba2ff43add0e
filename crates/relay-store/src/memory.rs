//! In-process [`SnapshotStore`].

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::errors::Result;
use crate::snapshot::{RoomSnapshot, SnapshotStore};

/// Keeps the latest snapshot in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    latest: Mutex<Option<RoomSnapshot>>,
    saves: AtomicU64,
}

impl MemorySnapshotStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `snapshot`, as if a previous run saved it.
    pub fn with_snapshot(snapshot: RoomSnapshot) -> Self {
        Self {
            latest: Mutex::new(Some(snapshot)),
            saves: AtomicU64::new(0),
        }
    }

    /// Latest saved snapshot.
    pub fn latest(&self) -> Option<RoomSnapshot> {
        self.latest.lock().clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<RoomSnapshot>> {
        Ok(self.latest())
    }

    fn save(&self, snapshot: &RoomSnapshot) -> Result<()> {
        *self.latest.lock() = Some(snapshot.clone());
        let _ = self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
