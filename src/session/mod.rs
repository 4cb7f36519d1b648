//! Call session tracking
//!
//! Each pair of identities negotiating a call has one explicit
//! [`CallSession`]. Every inbound call event is validated against it, so an
//! out-of-order event (a second offer on a connected call, an answer nobody
//! asked for) is rejected instead of being forwarded.

pub mod error;
pub mod state;
pub mod table;

pub use error::CallError;
pub use state::{CallPhase, CallSession};
pub use table::{CallKey, CallRef, CallTable};
