//! Negotiation relay and its lifecycle
//!
//! - [`router`]: pure protocol handlers, event in, dispatch list out
//! - [`dispatch`]: the instructions those handlers produce
//! - [`hub`]: the task that owns the relay state and executes dispatches
//! - [`config`]: pacing delays

pub mod config;
pub mod dispatch;
pub mod hub;
pub mod router;

pub use config::RelayConfig;
pub use dispatch::{Deferred, Dispatch};
pub use hub::{ClearSummary, ConnectionSender, HubHandle, Outgoing};
pub use router::{Relay, ResetSummary};
