//! Protocol errors raised while decoding or validating an inbound frame.

use thiserror::Error;

use crate::envelope::MessageKind;

/// A frame the hub refuses to process.
///
/// Every variant is answered with an `error` envelope to the sender; none of
/// them terminate the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame was not a JSON envelope.
    #[error("invalid message: {0}")]
    InvalidJson(String),
    /// A binary frame did not contain UTF-8 text.
    #[error("binary frames must contain UTF-8 encoded JSON")]
    InvalidEncoding,
    /// The kind requires a `room` field.
    #[error("'{0}' requires a room")]
    MissingRoom(MessageKind),
    /// The room name is empty or too long.
    #[error("invalid room name: {0}")]
    InvalidRoom(String),
    /// A `data_change` payload without a string `table` field.
    #[error("data_change requires a 'table' field in data")]
    MissingTable,
}
