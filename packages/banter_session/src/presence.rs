//! Last-write-wins presence store.

use std::collections::HashMap;

use crate::protocol::RoomId;

/// The most recent presence snapshot for a room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub online_count: u32,
    pub online_users: Vec<String>,
}

/// Per-room presence, keyed by room id. Snapshots replace wholesale; there
/// is no merging across snapshots.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    rooms: HashMap<RoomId, PresenceSnapshot>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, room_id: RoomId, snapshot: PresenceSnapshot) {
        self.rooms.insert(room_id, snapshot);
    }

    /// Latest snapshot for a room, or the zero/empty default before any
    /// snapshot has arrived.
    pub fn get(&self, room_id: RoomId) -> PresenceSnapshot {
        self.rooms.get(&room_id).cloned().unwrap_or_default()
    }

    pub fn remove(&mut self, room_id: RoomId) {
        self.rooms.remove(&room_id);
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}
