//! Store error types.

use thiserror::Error;

/// Errors raised by snapshot stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Connection pool error.
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),
    /// Snapshot payload could not be encoded or decoded.
    #[error("snapshot json: {0}")]
    Json(#[from] serde_json::Error),
    /// The stored snapshot was written by an incompatible version.
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    /// The store refused the operation (used by failing test doubles).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
