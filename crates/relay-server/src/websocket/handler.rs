//! Inbound frame routing.
//!
//! A frame is decoded into an [`Envelope`], validated into a [`Command`], and
//! dispatched against the hub. Protocol errors are answered with exactly one
//! `error` envelope to the sender and leave all state untouched.

use std::sync::Arc;

use metrics::counter;
use relay_core::{
    DataChange, Envelope, MessageKind, ProtocolError, table_room, validate_room,
};
use serde_json::Value;
use tracing::{debug, warn};

use super::connection::Session;
use crate::hub::Hub;
use crate::metrics::{WS_MESSAGES_RECEIVED_TOTAL, WS_PROTOCOL_ERRORS_TOTAL};

/// A validated client request.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Reply with `pong`.
    Ping {
        /// Timestamp of the ping.
        timestamp: i64,
    },
    /// Liveness only.
    Pong,
    /// Join a room.
    Join {
        /// Room to join.
        room: String,
    },
    /// Leave a room.
    Leave {
        /// Room to leave.
        room: String,
    },
    /// Chat message for every member of a room, sender included.
    Relay {
        /// Target room.
        room: String,
        /// Payload copied verbatim.
        data: Option<Value>,
    },
    /// Client-originated change notification for `table_<table>`.
    DataChange {
        /// `table_<table>` room.
        room: String,
        /// Payload relayed verbatim.
        payload: Value,
    },
    /// A kind the hub does not act on.
    Ignore(MessageKind),
}

impl Command {
    /// Validate a decoded envelope.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        let kind = envelope.kind;
        match kind {
            MessageKind::Ping => Ok(Self::Ping {
                timestamp: envelope.timestamp,
            }),
            MessageKind::Pong => Ok(Self::Pong),
            MessageKind::Join => Ok(Self::Join {
                room: required_room(kind, envelope.room)?,
            }),
            MessageKind::Leave => Ok(Self::Leave {
                room: required_room(kind, envelope.room)?,
            }),
            MessageKind::Message => Ok(Self::Relay {
                room: required_room(kind, envelope.room)?,
                data: envelope.data,
            }),
            MessageKind::DataChange => {
                let room = table_room(DataChange::table_of(envelope.data.as_ref())?);
                validate_room(&room)?;
                let payload = envelope.data.unwrap_or(Value::Null);
                Ok(Self::DataChange { room, payload })
            }
            MessageKind::UserStatus | MessageKind::Error | MessageKind::Unknown => {
                Ok(Self::Ignore(kind))
            }
        }
    }

    /// Decode and validate a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Self::from_envelope(Envelope::decode(text)?)
    }
}

fn required_room(kind: MessageKind, room: Option<String>) -> Result<String, ProtocolError> {
    let room = room.ok_or(ProtocolError::MissingRoom(kind))?;
    validate_room(&room)?;
    Ok(room)
}

/// Handle one inbound text frame from `session`.
pub fn handle_message(hub: &Arc<Hub>, session: &Arc<Session>, text: &str) {
    session.touch();
    match Command::parse(text) {
        Ok(command) => dispatch(hub, session, command),
        Err(err) => reject(hub, session, &err),
    }
}

/// Answer a protocol error with one `error` envelope.
pub fn reject(hub: &Hub, session: &Session, err: &ProtocolError) {
    counter!(WS_PROTOCOL_ERRORS_TOTAL).increment(1);
    debug!(session_id = %session.id, error = %err, "rejected frame");
    let _ = hub.send_to_session(session, &Envelope::error(err.to_string()));
}

fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Ping { .. } => MessageKind::Ping.as_str(),
        Command::Pong => MessageKind::Pong.as_str(),
        Command::Join { .. } => MessageKind::Join.as_str(),
        Command::Leave { .. } => MessageKind::Leave.as_str(),
        Command::Relay { .. } => MessageKind::Message.as_str(),
        Command::DataChange { .. } => MessageKind::DataChange.as_str(),
        Command::Ignore(kind) => kind.as_str(),
    }
}

fn dispatch(hub: &Arc<Hub>, session: &Arc<Session>, command: Command) {
    counter!(WS_MESSAGES_RECEIVED_TOTAL, "kind" => command_label(&command)).increment(1);

    match command {
        Command::Ping { timestamp } => {
            let _ = hub.send_to_session(session, &Envelope::pong(timestamp));
        }
        Command::Pong => {}
        Command::Join { room } => match hub.join(&session.id, &room) {
            Ok(outcome) => {
                let _ = hub.send_to_session(
                    session,
                    &Envelope::join_ack(&room, outcome.member_count()),
                );
            }
            Err(e) => warn!(session_id = %session.id, room = %room, error = %e, "join failed"),
        },
        Command::Leave { room } => {
            if let Err(e) = hub.leave(&session.id, &room) {
                warn!(session_id = %session.id, room = %room, error = %e, "leave failed");
            }
        }
        Command::Relay { room, data } => {
            let envelope = Envelope::chat(&room, Some(session.user_id.as_str()), data);
            let _ = hub.broadcast_to_room(&room, &envelope, None);
        }
        Command::DataChange { room, payload } => {
            let envelope = Envelope::new(MessageKind::DataChange)
                .with_room(&room)
                .with_user(&session.user_id)
                .with_data(payload);
            let _ = hub.broadcast_to_room(&room, &envelope, None);
        }
        Command::Ignore(kind) => {
            debug!(session_id = %session.id, %kind, "ignoring frame");
        }
    }
}
