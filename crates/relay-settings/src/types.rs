//! Settings types with compiled defaults.
//!
//! Every struct uses `#[serde(default)]` so a partial JSON file only needs to
//! name the values it overrides.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelaySettings {
    /// HTTP/WebSocket listener and connection limits.
    pub server: ServerSettings,
    /// Liveness probing.
    pub heartbeat: HeartbeatSettings,
    /// Room snapshot persistence.
    pub storage: StorageSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject combinations the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat.intervalMs must be greater than zero".into(),
            ));
        }
        if self.heartbeat.timeout_ms < self.heartbeat.interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeat.timeoutMs ({}) must be at least heartbeat.intervalMs ({})",
                self.heartbeat.timeout_ms, self.heartbeat.interval_ms
            )));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be greater than zero".into(),
            ));
        }
        if self.storage.snapshot_key.is_empty() {
            return Err(SettingsError::InvalidValue(
                "storage.snapshotKey must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent sessions (`0` = unlimited).
    pub max_connections: usize,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per session before new ones are dropped.
    pub send_queue_capacity: usize,
    /// Grace period for in-flight tasks on shutdown.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8787,
            max_connections: 1000,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// Heartbeat settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatSettings {
    /// Time between liveness checks.
    pub interval_ms: u64,
    /// Idle time after which a session is evicted.
    pub timeout_ms: u64,
}

impl HeartbeatSettings {
    /// Tick interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Liveness window.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            timeout_ms: 30_000,
        }
    }
}

/// Persistence settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageSettings {
    /// `SQLite` file holding the room snapshot. `None` uses `~/.relay/rooms.db`.
    pub db_path: Option<String>,
    /// Key of the snapshot row.
    pub snapshot_key: String,
}

impl StorageSettings {
    /// Resolved database path.
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .as_ref()
            .map_or_else(|| relay_home().join("rooms.db"), PathBuf::from)
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            snapshot_key: "rooms".into(),
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for terminals.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `info,relay_server=debug`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
        }
    }
}

/// `~/.relay`, falling back to `/tmp/.relay` without a home directory.
pub fn relay_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay")
}
