//! The connection record stored in the shared registry.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use parley_common::id::prefix;
use parley_common::PrefixedId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Opaque room identifier. Rooms are not validated against a catalog; a room
/// exists for routing purposes as soon as some connection claims it.
pub type RoomId = String;

/// Identity and room membership of one live socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub connection_id: String,
    pub user_id: String,
    #[serde(default)]
    pub joined_rooms: BTreeSet<RoomId>,
    pub connected_at: DateTime<Utc>,
}

impl PrefixedId for ConnectionRecord {
    const PREFIX: &'static str = prefix::CONNECTION;
}

impl ConnectionRecord {
    /// A fresh record with no rooms.
    pub fn new(connection_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            user_id: user_id.into(),
            joined_rooms: BTreeSet::new(),
            connected_at: Utc::now(),
        }
    }

    /// Add `room_id` to the joined set. Returns `false` if already joined.
    pub fn join(&mut self, room_id: &str) -> bool {
        self.joined_rooms.insert(room_id.to_string())
    }

    /// Remove `room_id` from the joined set. Returns `false` if not joined.
    pub fn leave(&mut self, room_id: &str) -> bool {
        self.joined_rooms.remove(room_id)
    }

    pub fn is_member(&self, room_id: &str) -> bool {
        self.joined_rooms.contains(room_id)
    }
}
