//! Relay server listener
//!
//! Handles TCP accept loop and spawns connection handlers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::registry::ConnectionId;
use crate::relay::{hub, ClearSummary, HubHandle};
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;

/// Signaling relay server
pub struct RelayServer {
    config: ServerConfig,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RelayServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<ClearSummary>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// Relay state starts empty. On shutdown every connection is closed and
    /// all state is dropped before this returns.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<ClearSummary>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        let (hub, hub_task) = hub::spawn(self.config.relay.clone());

        tracing::info!(
            addr = %local_addr,
            url = %self.config.endpoint_url(),
            offer_delay_ms = self.config.relay.offer_delay.as_millis() as u64,
            answer_delay_ms = self.config.relay.answer_delay.as_millis() as u64,
            "Signaling relay listening"
        );

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener, &hub) => result,
        };

        drop(listener);

        if let Ok(snapshot) = hub.stats().await {
            tracing::info!(
                connections = snapshot.relay.connections_opened,
                events = snapshot.relay.events_received,
                relayed = snapshot.relay.events_relayed,
                calls = snapshot.relay.calls_started,
                uptime_secs = snapshot.uptime.as_secs(),
                "Relay statistics"
            );
        }

        let summary = hub.shutdown().await?;
        if let Err(e) = hub_task.await {
            tracing::error!(error = %e, "Relay hub task failed");
        }

        result.map(|()| summary)
    }

    async fn accept_loop(&self, listener: &TcpListener, hub: &HubHandle) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr, hub);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr, hub: &HubHandle) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let id = ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed));

        tracing::debug!(connection_id = %id, peer = %peer_addr, "New connection");

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let connection = Connection::new(
            id,
            socket,
            peer_addr,
            self.config.handshake_timeout,
            hub.clone(),
        );

        tokio::spawn(async move {
            let _permit = permit;

            if let Err(e) = connection.run().await {
                tracing::debug!(connection_id = %id, error = %e, "Connection error");
            }

            tracing::debug!(connection_id = %id, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}
