//! WebSocket server
//!
//! Accepts TCP connections, upgrades them to WebSocket and bridges each one
//! to the relay hub.

pub mod config;
pub mod connection;
pub mod listener;

pub use config::{ConfigError, ServerConfig};
pub use connection::{Connection, ConnectionContext};
pub use listener::RelayServer;
