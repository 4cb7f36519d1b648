//! # rtc-relay
//!
//! A signaling relay that brokers the WebRTC call-setup handshake between two
//! browser peers. Media never flows through the relay; it only forwards
//! session descriptions and call-control events between the right pair of
//! WebSocket connections.
//!
//! ```text
//!   browser A ──ws──┐                         ┌──ws── browser B
//!                   ▼                         ▼
//!            [connection task]         [connection task]
//!                   │   HubCommand            ▲  ServerEvent
//!                   └──────► hub task ────────┘
//!                           ├── ConnectionRegistry  (identity <-> connection)
//!                           ├── RoomMembership      (room -> connections)
//!                           ├── CallTable           (pair -> call phase)
//!                           └── deferred timers     (offer/answer pacing)
//! ```
//!
//! # Example
//! ```no_run
//! use rtc_relay::{RelayServer, ServerConfig};
//!
//! # async fn example() -> rtc_relay::error::Result<()> {
//! let config = ServerConfig::from_env()?;
//! let server = RelayServer::new(config);
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod stats;

pub use relay::RelayConfig;
pub use server::{RelayServer, ServerConfig};
