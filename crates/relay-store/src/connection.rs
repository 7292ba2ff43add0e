//! Pooled `SQLite` connections for the snapshot table.
//!
//! The hub has one writer task and reads once at startup, so the pool stays
//! small. Every connection gets WAL journaling and a busy timeout when it is
//! handed out.

use std::path::PathBuf;
use std::time::Duration;

use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::Result;

/// Pool of snapshot database connections.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Where the snapshot database lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DbLocation {
    /// Private in-memory database; gone when the pool is dropped.
    Memory,
    /// Database file, created if missing.
    File(PathBuf),
}

/// Pool sizing and lock waiting.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Upper bound on open connections. Forced to 1 for [`DbLocation::Memory`].
    pub max_connections: u32,
    /// How long a statement waits on a locked database.
    pub busy_timeout: Duration,
    /// How long `pool.get()` waits for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 2,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct SnapshotPragmas {
    busy_timeout_ms: u128,
}

impl CustomizeConnection<Connection, rusqlite::Error> for SnapshotPragmas {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA busy_timeout = {};",
            self.busy_timeout_ms
        ))
    }
}

/// Open a pool on `location`.
pub fn open_pool(location: &DbLocation, options: &PoolOptions) -> Result<ConnectionPool> {
    let (manager, max_connections) = match location {
        // Each in-memory connection would be a separate empty database.
        DbLocation::Memory => (SqliteConnectionManager::memory(), 1),
        DbLocation::File(path) => (
            SqliteConnectionManager::file(path),
            options.max_connections.max(1),
        ),
    };
    let pool = Pool::builder()
        .max_size(max_connections)
        .connection_timeout(options.acquire_timeout)
        .connection_customizer(Box::new(SnapshotPragmas {
            busy_timeout_ms: options.busy_timeout.as_millis(),
        }))
        .build(manager)?;
    Ok(pool)
}
