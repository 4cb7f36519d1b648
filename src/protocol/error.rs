//! Protocol error types
//!
//! Raised while decoding or validating an inbound frame. None of these are
//! fatal: the frame is rejected and the connection stays open.

use super::sdp::SdpType;

/// Error type for frame decoding and validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not JSON or not a known event
    Malformed(String),
    /// Known event whose payload is missing fields or has mistyped ones
    InvalidPayload {
        event: &'static str,
        reason: String,
    },
    /// A required string field is empty
    MissingField {
        event: &'static str,
        field: &'static str,
    },
    /// Session description of the wrong kind
    WrongDescriptionType {
        event: &'static str,
        expected: SdpType,
        actual: SdpType,
    },
    /// Binary frames are not part of the protocol
    BinaryFrame,
}

impl ProtocolError {
    /// Event name the error belongs to, when known
    pub fn event(&self) -> Option<&'static str> {
        match self {
            ProtocolError::InvalidPayload { event, .. }
            | ProtocolError::MissingField { event, .. }
            | ProtocolError::WrongDescriptionType { event, .. } => Some(event),
            ProtocolError::Malformed(_) | ProtocolError::BinaryFrame => None,
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Malformed(reason) => write!(f, "Malformed event: {}", reason),
            ProtocolError::InvalidPayload { event, reason } => {
                write!(f, "Invalid {} payload: {}", event, reason)
            }
            ProtocolError::MissingField { event, field } => {
                write!(f, "Missing required field '{}' in {}", field, event)
            }
            ProtocolError::WrongDescriptionType {
                event,
                expected,
                actual,
            } => write!(
                f,
                "Expected {} description in {}, got {}",
                expected, event, actual
            ),
            ProtocolError::BinaryFrame => write!(f, "Binary frames are not supported"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Malformed(err.to_string())
    }
}
