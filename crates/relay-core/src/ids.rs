//! Identifier newtypes.
//!
//! Session ids are UUID v7 (time-ordered) with a `sess_` prefix so they read
//! unambiguously in logs next to user-supplied ids.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix for generated session ids.
const SESSION_PREFIX: &str = "sess_";

/// Prefix for generated anonymous user ids.
const ANONYMOUS_PREFIX: &str = "anon_";

/// Unique identifier for one live connection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh id for a connection accepted now.
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(format!("{SESSION_PREFIX}{}", Uuid::now_v7().simple()))
    }

    /// The id as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for SessionId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Generate a user id for a client that did not identify itself.
#[must_use]
pub fn anonymous_user_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("{ANONYMOUS_PREFIX}{}", &raw[..12])
}
