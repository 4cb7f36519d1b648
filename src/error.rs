//! Crate-wide error type

use tokio_tungstenite::tungstenite;

use crate::protocol::ProtocolError;
use crate::server::config::ConfigError;

/// Errors surfaced by the relay server
#[derive(Debug)]
pub enum Error {
    /// Socket or listener I/O failure
    Io(std::io::Error),
    /// WebSocket handshake or framing failure
    WebSocket(tungstenite::Error),
    /// Invalid configuration
    Config(ConfigError),
    /// Undecodable or invalid protocol frame
    Protocol(ProtocolError),
    /// The hub task is gone
    HubClosed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::HubClosed => write!(f, "Relay hub is not running"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::WebSocket(e) => Some(e),
            Error::Config(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::HubClosed => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Error::WebSocket(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

/// Result alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;
