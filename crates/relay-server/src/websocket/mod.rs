//! `WebSocket` sessions, room registry, heartbeat, message routing and fan-out.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod session;
