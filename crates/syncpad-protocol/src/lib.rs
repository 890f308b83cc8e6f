//! # syncpad-protocol
//!
//! Wire protocol definitions for the Syncpad room relay.
//!
//! Messages are JSON text frames tagged with a `type` field:
//!
//! - `initial_state` - snapshot and roster sent to a joining client
//! - `user_join` / `user_leave` - presence broadcasts
//! - `code_update` - full-document replacement, in both directions
//!
//! The relay is intentionally last-writer-wins: a `code_update` carries
//! the entire document and replaces the room snapshot wholesale.

pub mod messages;

pub use messages::{
    ClientMessage, CodeUpdatePayload, InitialStatePayload, Participant, PresencePayload,
    ProtocolError, ServerMessage,
};
