//! `SQLite`-backed [`SnapshotStore`].

use std::path::Path;

use rusqlite::{OptionalExtension, params};
use tracing::{debug, instrument};

use crate::connection::{ConnectionPool, DbLocation, PoolOptions, open_pool};
use crate::errors::Result;
use crate::snapshot::{RoomSnapshot, SnapshotStore};

/// Key of the snapshot row when none is configured.
pub const DEFAULT_SNAPSHOT_KEY: &str = "rooms";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS room_snapshots (
    key        TEXT PRIMARY KEY,
    payload    TEXT NOT NULL,
    updated_at TEXT NOT NULL
);";

/// Snapshot store holding a single row of `room_snapshots`.
pub struct SqliteSnapshotStore {
    pool: ConnectionPool,
    key: String,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, key: impl Into<String>) -> Result<Self> {
        let pool = open_pool(&DbLocation::File(path.to_path_buf()), &PoolOptions::default())?;
        Self::from_pool(pool, key)
    }

    /// Store backed by a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let pool = open_pool(&DbLocation::Memory, &PoolOptions::default())?;
        Self::from_pool(pool, DEFAULT_SNAPSHOT_KEY)
    }

    /// Wrap an existing pool, creating the table if needed.
    pub fn from_pool(pool: ConnectionPool, key: impl Into<String>) -> Result<Self> {
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self {
            pool,
            key: key.into(),
        })
    }

    /// Row key used by this store.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    #[instrument(skip(self), fields(key = %self.key))]
    fn load(&self) -> Result<Option<RoomSnapshot>> {
        let conn = self.pool.get()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM room_snapshots WHERE key = ?1",
                params![self.key],
                |row| row.get(0),
            )
            .optional()?;
        let Some(payload) = payload else {
            debug!("no stored snapshot");
            return Ok(None);
        };
        RoomSnapshot::decode(&payload).map(Some)
    }

    #[instrument(skip(self, snapshot), fields(key = %self.key, rooms = snapshot.rooms.len()))]
    fn save(&self, snapshot: &RoomSnapshot) -> Result<()> {
        let payload = snapshot.encode()?;
        let conn = self.pool.get()?;
        let _ = conn.execute(
            "INSERT INTO room_snapshots (key, payload, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 payload = excluded.payload,
                 updated_at = excluded.updated_at",
            params![self.key, payload, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
