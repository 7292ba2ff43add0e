//! # relay-store
//!
//! Durable storage for the hub's room membership.
//!
//! Only membership is persisted, never message bodies. The whole registry is
//! written as one [`RoomSnapshot`] under a single key and overwritten on every
//! mutation; it is read once at startup.
//!
//! - [`SqliteSnapshotStore`]: file-backed store on an `r2d2` pool (WAL mode)
//! - [`MemorySnapshotStore`]: in-process store for tests and ephemeral runs

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod memory;
pub mod snapshot;
pub mod sqlite;

pub use connection::{ConnectionPool, DbLocation, PoolOptions, open_pool};
pub use errors::{Result, StoreError};
pub use memory::MemorySnapshotStore;
pub use snapshot::{RoomSnapshot, SNAPSHOT_VERSION, SnapshotStore};
pub use sqlite::{DEFAULT_SNAPSHOT_KEY, SqliteSnapshotStore};
