//! Server configuration.

use std::time::Duration;

use relay_settings::RelaySettings;

use crate::hub::HubConfig;

/// Configuration for the relay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent sessions (`0` = unlimited).
    pub max_connections: usize,
    /// Max inbound `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per session.
    pub send_queue_capacity: usize,
    /// Time between heartbeat ticks.
    pub heartbeat_interval: Duration,
    /// Idle time after which a session is evicted.
    pub heartbeat_timeout: Duration,
    /// How long shutdown waits for in-flight connections.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1000,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Hub limits derived from this configuration.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_connections: self.max_connections,
            send_queue_capacity: self.send_queue_capacity,
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
        }
    }

    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            send_queue_capacity: settings.server.send_queue_capacity,
            heartbeat_interval: settings.heartbeat.interval(),
            heartbeat_timeout: settings.heartbeat.timeout(),
            shutdown_timeout: Duration::from_millis(settings.server.shutdown_timeout_ms),
        }
    }
}
