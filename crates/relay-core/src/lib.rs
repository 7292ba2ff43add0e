//! # relay-core
//!
//! Leaf types shared by every relay crate:
//!
//! - **Identifiers**: [`SessionId`] newtype and anonymous user ids
//! - **Envelope**: the JSON frame exchanged over the socket, tagged by [`MessageKind`]
//! - **Data changes**: [`DataChange`] notifications addressed to `table_<name>` rooms
//! - **Errors**: [`ProtocolError`] for frames the hub refuses to process

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;

pub use envelope::{
    DataChange, Envelope, MAX_ROOM_NAME_LEN, MessageKind, TABLE_ROOM_PREFIX, UserStatus, now_ms,
    table_room, validate_room,
};
pub use errors::ProtocolError;
pub use ids::{SessionId, anonymous_user_id};
