//! JSON text-frame codec

use serde::Deserialize;

use super::error::ProtocolError;
use super::event::{ClientEvent, ServerEvent};

/// Decode and validate one inbound text frame
///
/// The tag is read first so a known event with a bad payload is reported
/// under its own name.
pub fn decode(text: &str) -> Result<ClientEvent, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let known = ClientEvent::known_name(&envelope.event);

    let event: ClientEvent = match (serde_json::from_str(text), known) {
        (Ok(event), _) => event,
        (Err(err), Some(event)) => {
            return Err(ProtocolError::InvalidPayload {
                event,
                reason: err.to_string(),
            })
        }
        (Err(err), None) => return Err(err.into()),
    };
    event.validate()?;
    Ok(event)
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
}

/// Encode one outbound event as a text frame
pub fn encode(event: &ServerEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}
