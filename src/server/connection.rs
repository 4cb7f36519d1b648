//! Per-connection WebSocket task
//!
//! Upgrades the TCP stream, announces itself to the hub and then shuttles
//! frames both ways until either side closes. All relay decisions happen in
//! the hub; this task only decodes and encodes.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::{Error, Result};
use crate::protocol::codec;
use crate::protocol::ProtocolError;
use crate::registry::ConnectionId;
use crate::relay::{HubHandle, Outgoing};

/// Bookkeeping for one transport connection
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Hub-assigned connection id
    pub id: ConnectionId,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// When the WebSocket upgrade completed
    pub connected_at: Instant,

    /// Text frames received
    pub frames_in: u64,

    /// Frames written
    pub frames_out: u64,

    /// Frames that failed to decode
    pub rejected: u64,
}

impl ConnectionContext {
    pub fn new(id: ConnectionId, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            connected_at: Instant::now(),
            frames_in: 0,
            frames_out: 0,
            rejected: 0,
        }
    }

    /// Time since the upgrade
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// What the read/write loop should do next
enum Step {
    Continue,
    Stop,
}

/// One accepted TCP connection
pub struct Connection {
    id: ConnectionId,
    socket: TcpStream,
    peer_addr: SocketAddr,
    handshake_timeout: Duration,
    hub: HubHandle,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        socket: TcpStream,
        peer_addr: SocketAddr,
        handshake_timeout: Duration,
        hub: HubHandle,
    ) -> Self {
        Self {
            id,
            socket,
            peer_addr,
            handshake_timeout,
            hub,
        }
    }

    /// Run the connection to completion
    ///
    /// The hub always hears `close` once it has heard `open`, whatever ends
    /// the loop.
    pub async fn run(self) -> Result<ConnectionContext> {
        let Connection {
            id,
            socket,
            peer_addr,
            handshake_timeout,
            hub,
        } = self;

        let ws = match tokio::time::timeout(
            handshake_timeout,
            tokio_tungstenite::accept_async(socket),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "WebSocket handshake timed out",
                )))
            }
        };

        let mut ctx = ConnectionContext::new(id, peer_addr);
        let (tx, rx) = mpsc::unbounded_channel();
        hub.open(id, tx)?;

        tracing::debug!(connection_id = %id, peer = %peer_addr, "WebSocket open");

        let result = pump(ws, rx, &hub, &mut ctx).await;

        // Hub may already be gone during shutdown
        let _ = hub.close(id);

        tracing::debug!(
            connection_id = %id,
            frames_in = ctx.frames_in,
            frames_out = ctx.frames_out,
            rejected = ctx.rejected,
            duration_ms = ctx.duration().as_millis() as u64,
            "WebSocket closed"
        );

        result.map(|()| ctx)
    }
}

async fn pump(
    ws: WebSocketStream<TcpStream>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    hub: &HubHandle,
    ctx: &mut ConnectionContext,
) -> Result<()> {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(Outgoing::Event(event)) => {
                    let text = codec::encode(&event)?;
                    sink.send(Message::Text(text)).await?;
                    ctx.frames_out += 1;
                }
                Some(Outgoing::Close) | None => {
                    // Peer may have vanished already
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(message)) => {
                    if let Step::Stop = on_message(message, hub, ctx)? {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            },
        }
    }
}

fn on_message(message: Message, hub: &HubHandle, ctx: &mut ConnectionContext) -> Result<Step> {
    match message {
        Message::Text(text) => {
            ctx.frames_in += 1;
            match codec::decode(&text) {
                Ok(event) => {
                    tracing::trace!(connection_id = %ctx.id, event = event.name(), "Frame decoded");
                    hub.inbound(ctx.id, event)?;
                }
                Err(e) => {
                    ctx.rejected += 1;
                    hub.malformed(ctx.id, e)?;
                }
            }
            Ok(Step::Continue)
        }
        Message::Binary(_) => {
            ctx.rejected += 1;
            hub.malformed(ctx.id, ProtocolError::BinaryFrame)?;
            Ok(Step::Continue)
        }
        // tungstenite answers pings on the next write
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Step::Continue),
        Message::Close(_) => Ok(Step::Stop),
    }
}
