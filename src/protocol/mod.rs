//! Signaling wire protocol
//!
//! JSON events over WebSocket text frames. See [`event`] for the event set.

pub mod codec;
pub mod error;
pub mod event;
pub mod sdp;

pub use error::ProtocolError;
pub use event::{ClientEvent, ServerEvent};
pub use sdp::{SdpType, SessionDescription};
