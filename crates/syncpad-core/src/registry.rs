//! The process-wide room registry.
//!
//! The registry owns the room table; all mutation goes through its
//! operations so that joins, leaves, and document updates on one room
//! are serialized relative to each other. Callers never reach into room
//! internals directly.

use dashmap::DashMap;
use syncpad_protocol::ServerMessage;
use tracing::{debug, info, warn};

use crate::member::MemberHandle;
use crate::room::{Room, RoomId};

/// The central room registry.
///
/// Rooms are created lazily on first join and removed synchronously on
/// the transition to empty. Per-room mutation happens under the room's
/// map entry lock, which serializes joins, leaves, and document updates
/// for that room; rooms are independent of each other.
#[derive(Debug, Default)]
pub struct Registry {
    /// Rooms indexed by id.
    rooms: DashMap<RoomId, Room>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Join a member to a room, creating the room if needed.
    ///
    /// The joining member is sent a single `initial_state` frame with
    /// the room's current document and the roster of *other* members,
    /// then a `user_join` is broadcast to the rest of the room. Both
    /// happen under the room lock, so the new member never sees its own
    /// join notification and no broadcast can land in its queue ahead
    /// of the initial state.
    pub fn join(&self, room_id: &str, member: MemberHandle) {
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                debug!(room = %room_id, "Created room");
                Room::new(room_id)
            });

        let roster = room.participants(Some(member.conn_id()));
        member.send_message(&ServerMessage::initial_state(room.document(), roster));

        let conn_id = member.conn_id().to_string();
        let user = member.user().to_string();
        room.insert(member);
        room.broadcast(&ServerMessage::user_join(&user), Some(&conn_id));

        info!(room = %room_id, user = %user, members = room.member_count(), "Joined room");
    }

    /// Apply a `code_update` from a member: replace the room's document
    /// wholesale and broadcast the new content to every other member.
    ///
    /// The replace-and-broadcast is one step under the room lock, so two
    /// concurrent updates cannot interleave their effects. Last writer
    /// wins by design.
    ///
    /// Returns the number of members the update was delivered to.
    pub fn update_document(&self, room_id: &str, sender: &MemberHandle, content: String) -> usize {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            warn!(room = %room_id, "Update for unknown room");
            return 0;
        };

        let message = ServerMessage::code_update(&content, sender.user());
        room.set_document(content);
        room.broadcast(&message, Some(sender.conn_id()))
    }

    /// Remove a member from a room, broadcasting `user_leave` to the
    /// remaining members and deleting the room if it is now empty.
    ///
    /// A no-op if the member or room is already gone, so the explicit
    /// close path and the heartbeat path can both run it for the same
    /// connection.
    ///
    /// Returns `true` if the member was actually removed.
    pub fn leave(&self, room_id: &str, conn_id: &str) -> bool {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return false;
        };

        let Some(member) = room.remove(conn_id) else {
            return false;
        };

        room.broadcast(&ServerMessage::user_leave(member.user()), None);
        info!(room = %room_id, user = %member.user(), members = room.member_count(), "Left room");

        if room.is_empty() {
            drop(room); // Release the entry lock before touching the map again
            // A concurrent join may have repopulated the room since the
            // check above; only delete if it is still empty once the
            // entry lock is reacquired.
            if self
                .rooms
                .remove_if(room_id, |_, room| room.is_empty())
                .is_some()
            {
                debug!(room = %room_id, "Deleted empty room");
            }
        }

        true
    }

    /// Check if a room exists.
    #[must_use]
    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Get the number of rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get the member count of a room.
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|r| r.member_count()).unwrap_or(0)
    }

    /// Get a room's current document snapshot.
    #[must_use]
    pub fn document(&self, room_id: &str) -> Option<String> {
        self.rooms.get(room_id).map(|r| r.document().to_string())
    }

    /// Snapshot every connection in every room, paired with its room id.
    ///
    /// Used by the heartbeat monitor, which must not mutate rooms while
    /// iterating the table.
    #[must_use]
    pub fn probes(&self) -> Vec<(RoomId, MemberHandle)> {
        self.rooms
            .iter()
            .flat_map(|room| {
                let room_id = room.id().to_string();
                room.member_handles()
                    .into_iter()
                    .map(move |m| (room_id.clone(), m))
            })
            .collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            connection_count: self.rooms.iter().map(|r| r.member_count()).sum(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of connections across all rooms.
    pub connection_count: usize,
}
