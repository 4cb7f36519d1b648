//! End-to-end tests over real WebSocket connections

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use rtc_relay::protocol::{ServerEvent, SessionDescription};
use rtc_relay::relay::ClearSummary;
use rtc_relay::{RelayConfig, RelayServer, ServerConfig};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OFFER_DELAY: Duration = Duration::from_millis(150);
const ANSWER_DELAY: Duration = Duration::from_millis(50);
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<rtc_relay::error::Result<ClearSummary>>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = RelayConfig::default()
            .offer_delay(OFFER_DELAY)
            .answer_delay(ANSWER_DELAY);
        let server = RelayServer::new(ServerConfig::with_addr(addr).relay(relay));
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = stopped.await;
                })
                .await
        });

        Self { addr, stop, task }
    }

    async fn connect(&self) -> Client {
        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}", self.addr))
            .await
            .unwrap();
        match recv(&mut client).await {
            ServerEvent::Welcome { .. } => client,
            other => panic!("expected welcome, got {:?}", other),
        }
    }

    async fn stop(self) -> ClearSummary {
        self.stop.send(()).unwrap();
        tokio::time::timeout(RECV_TIMEOUT, self.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }
}

async fn send(client: &mut Client, value: serde_json::Value) {
    client.send(Message::Text(value.to_string())).await.unwrap();
}

async fn recv(client: &mut Client) -> ServerEvent {
    loop {
        let message = tokio::time::timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {:?}", other),
        }
    }
}

/// Nothing arrives within `window`
async fn assert_silent(client: &mut Client, window: Duration) {
    if let Ok(frame) = tokio::time::timeout(window, client.next()).await {
        panic!("expected silence, got {:?}", frame);
    }
}

async fn join(client: &mut Client, identity: &str, room: &str) {
    send(
        client,
        json!({ "event": "room-join", "data": { "identity": identity, "room": room } }),
    )
    .await;
    assert_eq!(recv(client).await, ServerEvent::RoomJoined { room: room.into() });
}

fn offer() -> serde_json::Value {
    json!({ "type": "offer", "sdp": "v=0 offer" })
}

fn answer() -> serde_json::Value {
    json!({ "type": "answer", "sdp": "v=0 answer" })
}

#[tokio::test]
async fn test_join_announces_to_room() {
    let server = TestServer::start().await;
    let mut x = server.connect().await;
    let mut y = server.connect().await;

    join(&mut x, "alice@x.com", "abc").await;
    join(&mut y, "bob@x.com", "abc").await;

    assert_eq!(
        recv(&mut x).await,
        ServerEvent::UserJoined {
            identity: "bob@x.com".into(),
            room: "abc".into()
        }
    );

    server.stop().await;
}

#[tokio::test]
async fn test_offer_delivered_after_delay() {
    let server = TestServer::start().await;
    let mut x = server.connect().await;
    let mut y = server.connect().await;
    join(&mut x, "alice@x.com", "abc").await;
    join(&mut y, "bob@x.com", "abc").await;
    recv(&mut x).await; // user-joined

    let sent_at = tokio::time::Instant::now();
    send(
        &mut x,
        json!({ "event": "call-user", "data": { "targetIdentity": "bob@x.com", "offer": offer() } }),
    )
    .await;

    assert_eq!(
        recv(&mut y).await,
        ServerEvent::IncomingCall {
            caller_identity: "alice@x.com".into(),
            offer: SessionDescription::offer("v=0 offer"),
        }
    );
    assert!(sent_at.elapsed() >= OFFER_DELAY);

    server.stop().await;
}

#[tokio::test]
async fn test_departed_peer_is_unreachable() {
    let server = TestServer::start().await;
    let mut x = server.connect().await;
    let mut y = server.connect().await;
    join(&mut x, "alice@x.com", "abc").await;
    join(&mut y, "bob@x.com", "abc").await;
    recv(&mut x).await; // user-joined

    y.close(None).await.unwrap();
    drop(y);

    // Registry entry is gone once a fresh lookup fails
    let mut unreachable = false;
    for _ in 0..20 {
        send(
            &mut x,
            json!({ "event": "call-user", "data": { "targetIdentity": "bob@x.com", "offer": offer() } }),
        )
        .await;
        match recv(&mut x).await {
            ServerEvent::PeerUnreachable { target_identity } => {
                assert_eq!(target_identity, "bob@x.com");
                unreachable = true;
                break;
            }
            // Raced the close; the pending offer dies with the callee
            ServerEvent::Error { .. } | ServerEvent::CallEnded => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    assert!(unreachable);

    // No late delivery for the abandoned offer
    assert_silent(&mut x, OFFER_DELAY * 2).await;

    server.stop().await;
}

#[tokio::test]
async fn test_full_call_setup() {
    let server = TestServer::start().await;
    let mut x = server.connect().await;
    let mut y = server.connect().await;
    join(&mut x, "alice@x.com", "abc").await;
    join(&mut y, "bob@x.com", "abc").await;
    recv(&mut x).await; // user-joined

    send(
        &mut x,
        json!({ "event": "call-user", "data": { "targetIdentity": "bob@x.com", "offer": offer() } }),
    )
    .await;
    assert!(matches!(recv(&mut y).await, ServerEvent::IncomingCall { .. }));

    send(
        &mut y,
        json!({ "event": "call-accepted", "data": { "callerIdentity": "alice@x.com", "answer": answer() } }),
    )
    .await;
    assert_eq!(
        recv(&mut x).await,
        ServerEvent::CallAcceptedByCallee {
            answer: SessionDescription::answer("v=0 answer")
        }
    );

    send(
        &mut x,
        json!({ "event": "negotiation-complete", "data": { "calleeIdentity": "bob@x.com" } }),
    )
    .await;
    assert_eq!(
        recv(&mut y).await,
        ServerEvent::AddTrackForCallee { room: "abc".into() }
    );

    send(
        &mut y,
        json!({ "event": "call-ended", "data": { "room": "abc", "remoteIdentity": "alice@x.com" } }),
    )
    .await;
    assert_eq!(recv(&mut x).await, ServerEvent::CallEnded);

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_frame_gets_error() {
    let server = TestServer::start().await;
    let mut x = server.connect().await;

    x.send(Message::Text("{not json".into())).await.unwrap();
    assert!(matches!(recv(&mut x).await, ServerEvent::Error { .. }));

    // Connection survives
    join(&mut x, "alice@x.com", "abc").await;

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let server = TestServer::start().await;
    let mut x = server.connect().await;
    join(&mut x, "alice@x.com", "abc").await;

    let summary = server.stop().await;
    assert_eq!(summary.connections, 1);
    assert_eq!(summary.state.identities, 1);

    let closed = tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match x.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
