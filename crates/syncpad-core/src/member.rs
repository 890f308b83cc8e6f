//! Per-connection member handles.
//!
//! A connection is represented as an explicit value type owning its room
//! id, username, liveness flag, and outbound queue, rather than metadata
//! attached to a transport object.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use syncpad_protocol::ServerMessage;
use tokio::sync::mpsc;

/// Atomic counter for process-unique connection ids.
static CONN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a process-unique connection id.
///
/// Usernames are self-declared and may collide within a room, so rooms
/// key their member sets by connection id instead.
#[must_use]
pub fn generate_conn_id() -> String {
    format!("conn_{}", CONN_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// An item queued for delivery to one connection.
///
/// Broadcast frames are serialized once and shared across recipients.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A serialized protocol frame.
    Frame(Arc<str>),
    /// A liveness probe.
    Ping,
    /// Reply to a client-initiated ping.
    Pong(Vec<u8>),
    /// Close the transport and stop the writer.
    Close,
}

/// Handle to a connected member.
///
/// The handle is cheaply cloneable; the connection handler owns the
/// original and the member's room holds a clone. Sending on a handle
/// whose connection has gone away is a no-op, never an error.
#[derive(Debug, Clone)]
pub struct MemberHandle {
    conn_id: Arc<str>,
    user: Arc<str>,
    alive: Arc<AtomicBool>,
    outbox: mpsc::UnboundedSender<Outbound>,
}

impl MemberHandle {
    /// Create a handle for a freshly accepted connection.
    ///
    /// The liveness flag starts true; the heartbeat monitor clears it
    /// before each probe and the pong handler sets it back.
    #[must_use]
    pub fn new(
        conn_id: impl Into<String>,
        user: impl Into<String>,
        outbox: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            conn_id: Arc::from(conn_id.into()),
            user: Arc::from(user.into()),
            alive: Arc::new(AtomicBool::new(true)),
            outbox,
        }
    }

    /// The process-unique connection id.
    #[must_use]
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// The self-declared username, used as both identity and label.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Whether a liveness reply arrived since the last probe.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Set the liveness flag.
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Relaxed);
    }

    /// Queue an item for delivery.
    ///
    /// Returns `false` if the connection's writer has already gone away.
    pub fn send(&self, item: Outbound) -> bool {
        self.outbox.send(item).is_ok()
    }

    /// Serialize a frame and queue it for delivery.
    ///
    /// Returns `false` if the frame could not be queued.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match message.encode() {
            Ok(text) => self.send(Outbound::Frame(Arc::from(text))),
            Err(e) => {
                tracing::error!(connection = %self.conn_id, error = %e, "Failed to encode frame");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(user: &str) -> (MemberHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MemberHandle::new(generate_conn_id(), user, tx), rx)
    }

    #[test]
    fn test_unique_conn_ids() {
        assert_ne!(generate_conn_id(), generate_conn_id());
    }

    #[test]
    fn test_liveness_flag() {
        let (member, _rx) = handle("alice");
        assert!(member.is_alive());

        member.set_alive(false);
        assert!(!member.is_alive());

        // Clones share the flag.
        let clone = member.clone();
        clone.set_alive(true);
        assert!(member.is_alive());
    }

    #[test]
    fn test_send_message() {
        let (member, mut rx) = handle("alice");
        assert!(member.send_message(&ServerMessage::user_join("bob")));

        match rx.try_recv().unwrap() {
            Outbound::Frame(text) => assert!(text.contains("user_join")),
            other => panic!("Expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (member, rx) = handle("alice");
        drop(rx);
        assert!(!member.send(Outbound::Ping));
    }
}
