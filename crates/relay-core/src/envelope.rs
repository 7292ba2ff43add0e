//! Wire envelope exchanged over the socket.
//!
//! Every inbound and outbound frame is a JSON object of the shape
//! `{ "type", "room"?, "userId"?, "data"?, "timestamp" }`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::ProtocolError;

/// Prefix of rooms that carry change notifications for a table.
pub const TABLE_ROOM_PREFIX: &str = "table_";

/// Longest accepted room name, in characters.
pub const MAX_ROOM_NAME_LEN: usize = 128;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Envelope kind tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Join a room (client) / join acknowledgement (server).
    Join,
    /// Leave a room.
    Leave,
    /// Chat relay within a room.
    Message,
    /// Liveness probe.
    Ping,
    /// Liveness reply.
    Pong,
    /// Record change notification for a `table_<name>` room.
    DataChange,
    /// Presence change of a room member.
    UserStatus,
    /// Protocol error reported to the sender.
    Error,
    /// Any tag this hub does not know.
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    /// Wire name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Message => "message",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::DataChange => "data_change",
            Self::UserStatus => "user_status",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence states carried in `user_status` envelopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// The session just opened (sent to the session itself).
    Connected,
    /// A member joined the room.
    Joined,
    /// A member left the room.
    Left,
    /// A member's connection went away.
    Disconnected,
}

impl UserStatus {
    /// Wire name of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Joined => "joined",
            Self::Left => "left",
            Self::Disconnected => "disconnected",
        }
    }
}

/// The frame exchanged over the socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Kind tag.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Target or source room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// User the envelope is about or from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Opaque payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Producer-assigned milliseconds since epoch. Inbound frames without
    /// one are stamped on receipt.
    #[serde(default = "now_ms")]
    pub timestamp: i64,
}

impl Envelope {
    /// Create an envelope of `kind` stamped with the current time.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            room: None,
            user_id: None,
            data: None,
            timestamp: now_ms(),
        }
    }

    /// Attach a room.
    #[must_use]
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Attach a user id.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Decode a text frame. Only JSON objects are accepted.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        if !value.is_object() {
            return Err(ProtocolError::InvalidJson("expected a JSON object".into()));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }

    /// Encode to a JSON string.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Server liveness probe.
    pub fn ping() -> Self {
        Self::new(MessageKind::Ping)
    }

    /// Reply to a `ping` sent at `received` (never earlier than it).
    pub fn pong(received: i64) -> Self {
        let mut env = Self::new(MessageKind::Pong);
        env.timestamp = env.timestamp.max(received);
        env
    }

    /// Error report for the sender.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(MessageKind::Error).with_data(json!({ "message": message.into() }))
    }

    /// Acknowledgement of a successful join.
    pub fn join_ack(room: &str, member_count: usize) -> Self {
        Self::new(MessageKind::Join)
            .with_room(room)
            .with_data(json!({ "success": true, "memberCount": member_count }))
    }

    /// Presence change of `user_id` in `room`.
    pub fn user_status(room: &str, user_id: &str, status: UserStatus) -> Self {
        Self::new(MessageKind::UserStatus)
            .with_room(room)
            .with_user(user_id)
            .with_data(json!({ "status": status.as_str() }))
    }

    /// First frame a new session receives.
    pub fn connected(session_id: &str, user_id: &str) -> Self {
        Self::new(MessageKind::UserStatus)
            .with_user(user_id)
            .with_data(json!({
                "status": UserStatus::Connected.as_str(),
                "sessionId": session_id,
            }))
    }

    /// Chat message relayed within `room`.
    pub fn chat(room: &str, user_id: Option<&str>, data: Option<Value>) -> Self {
        let mut env = Self::new(MessageKind::Message).with_room(room);
        env.user_id = user_id.map(str::to_owned);
        env.data = data;
        env
    }
}

/// Room carrying change notifications for `table`.
pub fn table_room(table: &str) -> String {
    format!("{TABLE_ROOM_PREFIX}{table}")
}

/// Validate a client-supplied room name.
pub fn validate_room(room: &str) -> Result<(), ProtocolError> {
    if room.trim().is_empty() {
        return Err(ProtocolError::InvalidRoom("room name is empty".into()));
    }
    if room.chars().count() > MAX_ROOM_NAME_LEN {
        return Err(ProtocolError::InvalidRoom(format!(
            "room name exceeds {MAX_ROOM_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// A record change produced by the CRUD layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChange {
    /// Table (model) name.
    pub table: String,
    /// Action name, e.g. `create`, `update`, `delete`, `batch_delete`.
    pub action: String,
    /// Affected record, if a single one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Changed values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl DataChange {
    /// Create a change for `table`.
    pub fn new(table: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            action: action.into(),
            record_id: None,
            data: None,
        }
    }

    /// Attach the affected record id.
    #[must_use]
    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Attach the changed values.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Room subscribers of this table listen on.
    pub fn room(&self) -> String {
        table_room(&self.table)
    }

    /// Build the `data_change` envelope addressed to [`Self::room`].
    pub fn to_envelope(&self) -> Envelope {
        let data = serde_json::to_value(self).unwrap_or_else(|_| json!({ "table": self.table }));
        Envelope::new(MessageKind::DataChange)
            .with_room(self.room())
            .with_data(data)
    }

    /// Extract the `table` field of a client-supplied `data_change` payload.
    pub fn table_of(payload: Option<&Value>) -> Result<&str, ProtocolError> {
        payload
            .and_then(|p| p.get("table"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or(ProtocolError::MissingTable)
    }
}
