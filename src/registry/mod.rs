//! Connection registry and room membership
//!
//! The registry is the single source of truth for which identity is reachable
//! on which connection. Rooms group connections only so a join can be
//! announced to the people already waiting there.
//!
//! # Architecture
//!
//! ```text
//!              ConnectionRegistry
//!     ┌──────────────────────────────────┐
//!     │ identity_to_connection           │
//!     │   "alice@x.com" ─► conn 1        │
//!     │   "bob@x.com"   ─► conn 2        │
//!     │ connection_to_identity           │
//!     │   conn 1 ─► "alice@x.com"        │
//!     │   conn 2 ─► "bob@x.com"          │
//!     └──────────────────────────────────┘
//!
//!              RoomMembership
//!     ┌──────────────────────────────────┐
//!     │ "abc" ─► { conn 1, conn 2 }      │
//!     └──────────────────────────────────┘
//! ```
//!
//! Neither type is thread-safe on its own; both are owned by the relay hub
//! task, which serializes all access.

pub mod connection;
pub mod room;
pub mod store;

pub use connection::ConnectionId;
pub use room::{generate_room_code, RoomMembership};
pub use store::ConnectionRegistry;

/// Participant identity (an email address in practice)
pub type Identity = String;

/// Room identifier
pub type RoomId = String;
