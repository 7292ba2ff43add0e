//! Room name → member session ids.
//!
//! A room exists exactly while it has at least one member: the first join
//! creates it and the last leave (or disconnect) removes it.

use std::collections::{BTreeMap, BTreeSet};

use relay_core::SessionId;
use relay_store::RoomSnapshot;

/// Result of [`RoomRegistry::join`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The session was added.
    Joined {
        /// Members after the join.
        member_count: usize,
    },
    /// The session was already a member; nothing changed.
    AlreadyMember {
        /// Current members.
        member_count: usize,
    },
}

impl JoinOutcome {
    /// Members after the call.
    pub fn member_count(self) -> usize {
        match self {
            Self::Joined { member_count } | Self::AlreadyMember { member_count } => member_count,
        }
    }

    /// Whether membership changed.
    pub fn is_new(self) -> bool {
        matches!(self, Self::Joined { .. })
    }
}

/// Result of [`RoomRegistry::leave`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The session was removed.
    Left {
        /// Members still in the room (`0` means the room is gone).
        remaining: usize,
    },
    /// The session was not a member; nothing changed.
    NotMember,
}

/// Membership table for all rooms.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: BTreeMap<String, BTreeSet<SessionId>>,
}

impl RoomRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `session` to `room`, creating the room if needed.
    pub fn join(&mut self, session: &SessionId, room: &str) -> JoinOutcome {
        let members = self.rooms.entry(room.to_owned()).or_default();
        if members.insert(session.clone()) {
            JoinOutcome::Joined {
                member_count: members.len(),
            }
        } else {
            JoinOutcome::AlreadyMember {
                member_count: members.len(),
            }
        }
    }

    /// Remove `session` from `room`, deleting the room if it empties.
    pub fn leave(&mut self, session: &SessionId, room: &str) -> LeaveOutcome {
        let Some(members) = self.rooms.get_mut(room) else {
            return LeaveOutcome::NotMember;
        };
        if !members.remove(session) {
            return LeaveOutcome::NotMember;
        }
        let remaining = members.len();
        if remaining == 0 {
            let _ = self.rooms.remove(room);
        }
        LeaveOutcome::Left { remaining }
    }

    /// Remove `session` from every room. Returns the rooms it was in.
    pub fn remove_session(&mut self, session: &SessionId) -> Vec<String> {
        let mut affected = Vec::new();
        self.rooms.retain(|room, members| {
            if members.remove(session) {
                affected.push(room.clone());
            }
            !members.is_empty()
        });
        affected
    }

    /// Members of `room` (empty if the room does not exist).
    pub fn members_of(&self, room: &str) -> Vec<SessionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of members in `room`.
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, BTreeSet::len)
    }

    /// Whether `room` currently exists.
    pub fn contains(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Number of rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room exists.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// `(room, member_count)` pairs in name order.
    pub fn rooms(&self) -> impl Iterator<Item = (&str, usize)> {
        self.rooms.iter().map(|(name, members)| (name.as_str(), members.len()))
    }

    /// Current membership as a persistable snapshot.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot::new(
            self.rooms
                .iter()
                .map(|(room, members)| {
                    (
                        room.clone(),
                        members.iter().map(|id| id.as_str().to_owned()).collect(),
                    )
                })
                .collect(),
        )
    }
}
