//! # syncpad-core
//!
//! Room state, registry, and broadcast engine for the Syncpad relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **MemberHandle** - per-connection identity, liveness flag, and
//!   outbound queue
//! - **Room** - a named group of members sharing one document snapshot
//! - **Registry** - the process-wide room table with join/leave/update
//!   operations
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│  Registry   │────▶│    Room     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                                                ▼ fan-out
//!                                         member outboxes
//! ```
//!
//! All mutation of a room's member set and document goes through the
//! registry, which serializes joins, leaves, and document updates per
//! room.

pub mod member;
pub mod registry;
pub mod room;

pub use member::{MemberHandle, Outbound};
pub use registry::{Registry, RegistryStats};
pub use room::{Room, RoomId};
