//! Room state and the broadcast engine.
//!
//! A room is a named group of member connections sharing one document
//! snapshot. The document is a single string replaced wholesale by each
//! accepted update.

use std::collections::HashMap;
use std::sync::Arc;

use syncpad_protocol::{Participant, ServerMessage};
use tracing::{debug, error, trace};

use crate::member::{MemberHandle, Outbound};

/// A room identifier. Opaque, supplied by clients.
pub type RoomId = String;

/// A room: its members and the current document snapshot.
#[derive(Debug)]
pub struct Room {
    /// Room name.
    id: RoomId,
    /// Members keyed by connection id.
    members: HashMap<String, MemberHandle>,
    /// Full current document text.
    document: String,
}

impl Room {
    /// Create an empty room with an empty document.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            members: HashMap::new(),
            document: String::new(),
        }
    }

    /// Get the room name.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Get the current document snapshot.
    #[must_use]
    pub fn document(&self) -> &str {
        &self.document
    }

    /// Replace the document snapshot wholesale.
    pub fn set_document(&mut self, content: String) {
        self.document = content;
    }

    /// Add a member to the room.
    pub fn insert(&mut self, member: MemberHandle) {
        debug!(room = %self.id, connection = %member.conn_id(), user = %member.user(), "Member joined");
        self.members.insert(member.conn_id().to_string(), member);
    }

    /// Remove a member by connection id.
    ///
    /// Returns the removed handle, or `None` if it was already gone.
    pub fn remove(&mut self, conn_id: &str) -> Option<MemberHandle> {
        let removed = self.members.remove(conn_id);
        if let Some(member) = &removed {
            debug!(room = %self.id, connection = %conn_id, user = %member.user(), "Member removed");
        }
        removed
    }

    /// The roster of members, excluding one connection if given.
    #[must_use]
    pub fn participants(&self, excluding: Option<&str>) -> Vec<Participant> {
        self.members
            .values()
            .filter(|m| excluding != Some(m.conn_id()))
            .map(|m| Participant::new(m.user()))
            .collect()
    }

    /// All member handles, cloned.
    #[must_use]
    pub fn member_handles(&self) -> Vec<MemberHandle> {
        self.members.values().cloned().collect()
    }

    /// Broadcast a frame to every member, skipping the excluded
    /// connection if given.
    ///
    /// The frame is serialized once and shared across recipients.
    /// Delivery is fire-and-forget: a member whose outbound queue has
    /// closed is skipped and the remaining members still receive the
    /// frame.
    ///
    /// Returns the number of members the frame was queued for.
    pub fn broadcast(&self, message: &ServerMessage, excluding: Option<&str>) -> usize {
        let text: Arc<str> = match message.encode() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                error!(room = %self.id, error = %e, "Failed to encode broadcast frame");
                return 0;
            }
        };

        let mut delivered = 0;
        for member in self.members.values() {
            if excluding == Some(member.conn_id()) {
                continue;
            }
            if member.send(Outbound::Frame(Arc::clone(&text))) {
                delivered += 1;
            } else {
                // Closed between listing and writing; tolerated.
                trace!(room = %self.id, connection = %member.conn_id(), "Skipped closed member");
            }
        }

        trace!(room = %self.id, recipients = delivered, "Broadcast frame");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::generate_conn_id;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn member(user: &str) -> (MemberHandle, UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MemberHandle::new(generate_conn_id(), user, tx), rx)
    }

    fn recv_frame(rx: &mut UnboundedReceiver<Outbound>) -> ServerMessage {
        match rx.try_recv().expect("expected a queued frame") {
            Outbound::Frame(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("Expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_room_creation() {
        let room = Room::new("r1");
        assert_eq!(room.id(), "r1");
        assert_eq!(room.document(), "");
        assert!(room.is_empty());
    }

    #[test]
    fn test_insert_remove() {
        let mut room = Room::new("r1");
        let (alice, _rx) = member("alice");
        let conn_id = alice.conn_id().to_string();

        room.insert(alice);
        assert_eq!(room.member_count(), 1);

        assert!(room.remove(&conn_id).is_some());
        assert!(room.is_empty());

        // Already gone.
        assert!(room.remove(&conn_id).is_none());
    }

    #[test]
    fn test_participants_excludes_connection() {
        let mut room = Room::new("r1");
        let (alice, _arx) = member("alice");
        let (bob, _brx) = member("bob");
        let alice_id = alice.conn_id().to_string();

        room.insert(alice);
        room.insert(bob);

        let roster = room.participants(Some(&alice_id));
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, "bob");

        assert_eq!(room.participants(None).len(), 2);
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let mut room = Room::new("r1");
        let (alice, mut alice_rx) = member("alice");
        let (bob, mut bob_rx) = member("bob");
        let alice_id = alice.conn_id().to_string();

        room.insert(alice);
        room.insert(bob);

        let delivered = room.broadcast(&ServerMessage::user_join("alice"), Some(&alice_id));
        assert_eq!(delivered, 1);

        assert_eq!(recv_frame(&mut bob_rx), ServerMessage::user_join("alice"));
        assert!(alice_rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_tolerates_closed_member() {
        let mut room = Room::new("r1");
        let (alice, alice_rx) = member("alice");
        let (bob, mut bob_rx) = member("bob");

        room.insert(alice);
        room.insert(bob);
        drop(alice_rx); // alice's writer is gone

        let delivered = room.broadcast(&ServerMessage::code_update("x", "carol"), None);
        assert_eq!(delivered, 1);
        assert_eq!(
            recv_frame(&mut bob_rx),
            ServerMessage::code_update("x", "carol")
        );
    }

    #[test]
    fn test_set_document_replaces_wholesale() {
        let mut room = Room::new("r1");
        room.set_document("x = 1".to_string());
        room.set_document("y".to_string());
        assert_eq!(room.document(), "y");
    }
}
