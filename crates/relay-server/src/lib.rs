//! # relay-server
//!
//! Realtime room hub served over axum.
//!
//! - `WebSocket` gateway: sessions, heartbeat liveness, message routing
//! - Rooms: membership registry with presence notifications and fan-out
//! - Persistence: room membership snapshots written off the hot path
//! - HTTP control surface: status, server broadcast, data-change notify,
//!   health and Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod control;
pub mod error;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod persistence;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use error::{ApiError, HubError};
pub use hub::{ChangeNotifier, Hub, HubConfig, HubStatus, RoomStatus};
pub use server::{AppState, RelayServer};
pub use shutdown::ShutdownCoordinator;
