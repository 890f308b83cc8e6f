//! Message types for the Syncpad protocol.
//!
//! Every frame on the wire is a JSON object with a `type` tag and a
//! `payload` object; outbound `code_update` frames additionally carry a
//! top-level `senderId`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing an inbound frame.
///
/// Neither variant is fatal to the connection: the relay logs and
/// discards the offending frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON or its payload has the wrong shape.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame parsed but its `type` tag is not recognized.
    #[error("Unrecognized message type: {0}")]
    UnknownType(String),
}

/// A participant entry in the `initial_state` roster.
///
/// The relay uses the self-declared username as both identity and
/// display name, so `id` and `name` carry the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Participant identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl Participant {
    /// Create a participant entry from a username.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            id: username.clone(),
            name: username,
        }
    }
}

/// Payload of an `initial_state` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialStatePayload {
    /// Full current document text of the room.
    #[serde(rename = "documentContent")]
    pub document_content: String,
    /// The other members currently in the room.
    pub participants: Vec<Participant>,
}

/// Payload of a `user_join` or `user_leave` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    /// Participant identifier.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Display name.
    pub name: String,
}

/// Payload of a `code_update` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeUpdatePayload {
    /// Full replacement document text.
    pub content: String,
}

/// A frame sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Snapshot and roster, sent once immediately after a join.
    InitialState { payload: InitialStatePayload },

    /// A new participant joined the room.
    UserJoin { payload: PresencePayload },

    /// A participant left the room (close, error, or timeout).
    UserLeave { payload: PresencePayload },

    /// Another participant replaced the document.
    CodeUpdate {
        payload: CodeUpdatePayload,
        /// Username of the participant that originated the update.
        #[serde(rename = "senderId")]
        sender_id: String,
    },
}

impl ServerMessage {
    /// Create an `initial_state` frame.
    #[must_use]
    pub fn initial_state(document_content: impl Into<String>, participants: Vec<Participant>) -> Self {
        ServerMessage::InitialState {
            payload: InitialStatePayload {
                document_content: document_content.into(),
                participants,
            },
        }
    }

    /// Create a `user_join` frame for a username.
    #[must_use]
    pub fn user_join(username: impl Into<String>) -> Self {
        let username = username.into();
        ServerMessage::UserJoin {
            payload: PresencePayload {
                user_id: username.clone(),
                name: username,
            },
        }
    }

    /// Create a `user_leave` frame for a username.
    #[must_use]
    pub fn user_leave(username: impl Into<String>) -> Self {
        let username = username.into();
        ServerMessage::UserLeave {
            payload: PresencePayload {
                user_id: username.clone(),
                name: username,
            },
        }
    }

    /// Create an outbound `code_update` frame.
    #[must_use]
    pub fn code_update(content: impl Into<String>, sender_id: impl Into<String>) -> Self {
        ServerMessage::CodeUpdate {
            payload: CodeUpdatePayload {
                content: content.into(),
            },
            sender_id: sender_id.into(),
        }
    }

    /// Serialize the frame to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Envelope used to inspect the `type` tag of an inbound frame before
/// committing to a payload shape.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Full-document replacement.
    CodeUpdate { content: String },
}

impl ClientMessage {
    /// Parse a raw inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the frame is not valid
    /// JSON or its payload has the wrong shape, and
    /// [`ProtocolError::UnknownType`] for an unrecognized `type` tag.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        match envelope.kind.as_str() {
            "code_update" => {
                let payload: CodeUpdatePayload = serde_json::from_value(envelope.payload)?;
                Ok(ClientMessage::CodeUpdate {
                    content: payload.content,
                })
            }
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initial_state_wire_shape() {
        let msg = ServerMessage::initial_state("x = 1", vec![Participant::new("alice")]);
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "initial_state",
                "payload": {
                    "documentContent": "x = 1",
                    "participants": [{"id": "alice", "name": "alice"}],
                }
            })
        );
    }

    #[test]
    fn test_presence_wire_shape() {
        let join: serde_json::Value =
            serde_json::from_str(&ServerMessage::user_join("bob").encode().unwrap()).unwrap();
        assert_eq!(join["type"], "user_join");
        assert_eq!(join["payload"]["userId"], "bob");
        assert_eq!(join["payload"]["name"], "bob");

        let leave: serde_json::Value =
            serde_json::from_str(&ServerMessage::user_leave("bob").encode().unwrap()).unwrap();
        assert_eq!(leave["type"], "user_leave");
        assert_eq!(leave["payload"]["userId"], "bob");
    }

    #[test]
    fn test_code_update_carries_sender_id() {
        let msg = ServerMessage::code_update("fn main() {}", "alice");
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();

        assert_eq!(value["type"], "code_update");
        assert_eq!(value["payload"]["content"], "fn main() {}");
        assert_eq!(value["senderId"], "alice");
    }

    #[test]
    fn test_parse_code_update() {
        let raw = r#"{"type":"code_update","payload":{"content":"let x = 2;"}}"#;
        let msg = ClientMessage::parse(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::CodeUpdate {
                content: "let x = 2;".to_string()
            }
        );
    }

    #[test]
    fn test_parse_empty_content_is_valid() {
        let raw = r#"{"type":"code_update","payload":{"content":""}}"#;
        let msg = ClientMessage::parse(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::CodeUpdate {
                content: String::new()
            }
        );
    }

    #[test]
    fn test_parse_unknown_type() {
        let raw = r#"{"type":"cursor_move","payload":{"line":3}}"#;
        match ClientMessage::parse(raw) {
            Err(ProtocolError::UnknownType(kind)) => assert_eq!(kind, "cursor_move"),
            other => panic!("Expected UnknownType error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            ClientMessage::parse("not json at all"),
            Err(ProtocolError::Malformed(_))
        ));

        // Valid JSON, wrong payload shape.
        let raw = r#"{"type":"code_update","payload":{"body":"x"}}"#;
        assert!(matches!(
            ClientMessage::parse(raw),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_server_message_roundtrip() {
        let msg = ServerMessage::code_update("x", "alice");
        let decoded: ServerMessage = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(msg, decoded);
    }
}
