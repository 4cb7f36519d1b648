//! Dispatch instructions produced by the relay
//!
//! The router never touches sockets or timers. It returns a list of these and
//! the hub carries them out, in order.

use std::time::Duration;

use crate::protocol::ServerEvent;
use crate::registry::{ConnectionId, Identity};
use crate::session::CallRef;

/// What the hub should do with one outbound event
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Reply or broadcast to a connection; nobody to tell if it fails
    Send { to: ConnectionId, event: ServerEvent },

    /// Relay on behalf of `origin`; a failed send becomes `peer-unreachable`
    Forward {
        origin: ConnectionId,
        to: ConnectionId,
        /// Name reported back to `origin` on failure
        target: String,
        event: ServerEvent,
    },

    /// Resolve `target` and forward after `after`
    Defer(Deferred),
}

/// A forward waiting on the pacing timer
///
/// The target is resolved when the timer fires, not when it is armed, so a
/// peer that leaves during the wait is reported as unreachable.
#[derive(Debug, Clone, PartialEq)]
pub struct Deferred {
    /// Connection whose event produced this forward
    pub origin: ConnectionId,

    /// Identity to resolve at fire time
    pub target: Identity,

    /// Call session the event belongs to; dropped if that session ended
    /// meanwhile, even when the same pair has started a new one
    pub call: CallRef,

    /// How long to wait
    pub after: Duration,

    /// What to deliver
    pub event: ServerEvent,
}

impl Dispatch {
    /// The connection this instruction addresses right now, if any
    pub fn recipient(&self) -> Option<ConnectionId> {
        match self {
            Dispatch::Send { to, .. } | Dispatch::Forward { to, .. } => Some(*to),
            Dispatch::Defer(_) => None,
        }
    }
}
