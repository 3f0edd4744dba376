use dashmap::DashMap;

use crate::connections::ConnectionId;

use super::RoomId;

/// Room id to member connections, in join order.
///
/// Every mutation of a room happens under that room's map entry lock, so
/// concurrent joins and leaves of one room serialize while other rooms
/// proceed independently. A room exists only while it has members.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: DashMap<RoomId, Vec<ConnectionId>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `connection_id` to `room_id`, creating the room on first join.
    ///
    /// Returns the full membership after the join, including the new member.
    pub fn join(&self, room_id: &RoomId, connection_id: ConnectionId) -> Vec<ConnectionId> {
        self.join_with(room_id, connection_id, |_| {})
    }

    /// Like [`join`](Self::join), but runs `announce` with the new membership
    /// while the room is still locked.
    ///
    /// Joins of the same room are announced in the order they happened, so
    /// nothing a later joiner triggers can overtake an earlier announcement.
    /// `announce` must not block or touch this directory.
    pub fn join_with<F>(&self, room_id: &RoomId, connection_id: ConnectionId, announce: F) -> Vec<ConnectionId>
    where
        F: FnOnce(&[ConnectionId]),
    {
        let mut members = self.rooms.entry(room_id.clone()).or_default();
        if !members.contains(&connection_id) {
            members.push(connection_id);
        }

        tracing::debug!(room = %room_id, connection = %connection_id, members = members.len(), "member joined");
        announce(&members);
        members.clone()
    }

    /// Removes `connection_id` from `room_id`, dropping the room once empty.
    ///
    /// Returns `true` if the room was removed by this call.
    pub fn leave(&self, room_id: &RoomId, connection_id: ConnectionId) -> bool {
        let removed = self.rooms.remove_if_mut(room_id, |_, members| {
            members.retain(|member| *member != connection_id);
            members.is_empty()
        });

        if removed.is_some() {
            tracing::debug!(room = %room_id, "room emptied");
        }
        removed.is_some()
    }

    pub fn members(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
