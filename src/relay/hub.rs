//! Relay hub
//!
//! One task owns the [`Relay`] and the outbound sender of every live
//! connection. Connection tasks talk to it through [`HubHandle`]; commands are
//! processed strictly one at a time, which gives run-to-completion semantics
//! without a lock on the registry.
//!
//! Pacing delays are separate timer tasks that post a `Fire` command back into
//! the same queue when they elapse, so a pending delay never holds up other
//! connections. Each timer is tied to the connection whose event armed it and
//! is aborted when that connection closes.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::{Error, Result};
use crate::protocol::{ClientEvent, ProtocolError, ServerEvent};
use crate::registry::ConnectionId;
use crate::stats::StatsSnapshot;

use super::config::RelayConfig;
use super::dispatch::{Deferred, Dispatch};
use super::router::{Relay, ResetSummary};

/// What the hub asks a connection task to do
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Write one event
    Event(ServerEvent),
    /// Close the socket
    Close,
}

/// Sender half owned by the hub for each connection
pub type ConnectionSender = mpsc::UnboundedSender<Outgoing>;

/// Result of a clear-and-disconnect pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearSummary {
    /// Transport connections force-closed
    pub connections: usize,
    /// Pending deliveries aborted
    pub timers: usize,
    /// Registry, room and call entries dropped
    pub state: ResetSummary,
}

#[derive(Debug)]
enum HubCommand {
    Open {
        id: ConnectionId,
        sender: ConnectionSender,
    },
    Inbound {
        id: ConnectionId,
        event: ClientEvent,
    },
    Malformed {
        id: ConnectionId,
        error: ProtocolError,
    },
    Closed {
        id: ConnectionId,
    },
    Fire {
        token: u64,
        deferred: Deferred,
    },
    Stats(oneshot::Sender<StatsSnapshot>),
    Shutdown(oneshot::Sender<ClearSummary>),
}

/// Cloneable handle to the hub task
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Announce a new transport connection
    pub fn open(&self, id: ConnectionId, sender: ConnectionSender) -> Result<()> {
        self.send(HubCommand::Open { id, sender })
    }

    /// Hand over a decoded inbound event
    pub fn inbound(&self, id: ConnectionId, event: ClientEvent) -> Result<()> {
        self.send(HubCommand::Inbound { id, event })
    }

    /// Report a frame that failed to decode
    pub fn malformed(&self, id: ConnectionId, error: ProtocolError) -> Result<()> {
        self.send(HubCommand::Malformed { id, error })
    }

    /// Announce that a transport connection closed
    pub fn close(&self, id: ConnectionId) -> Result<()> {
        self.send(HubCommand::Closed { id })
    }

    /// Current counters
    pub async fn stats(&self) -> Result<StatsSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats(reply))?;
        rx.await.map_err(|_| Error::HubClosed)
    }

    /// Clear all state, force-close every connection and stop the hub
    pub async fn shutdown(&self) -> Result<ClearSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Shutdown(reply))?;
        rx.await.map_err(|_| Error::HubClosed)
    }

    fn send(&self, command: HubCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::HubClosed)
    }
}

/// Start the hub task
///
/// The hub clears its state before handling the first command and runs until
/// [`HubHandle::shutdown`] is called or every handle is dropped.
pub fn spawn(config: RelayConfig) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let hub = Hub {
        relay: Relay::new(config),
        connections: HashMap::new(),
        timers: HashMap::new(),
        next_token: 1,
        commands: rx,
        loopback: tx.downgrade(),
        started_at: Instant::now(),
    };
    let task = tokio::spawn(hub.run());
    (HubHandle { tx }, task)
}

struct PendingTimer {
    origin: ConnectionId,
    abort: AbortHandle,
}

struct Hub {
    relay: Relay,
    connections: HashMap<ConnectionId, ConnectionSender>,
    timers: HashMap<u64, PendingTimer>,
    next_token: u64,
    commands: mpsc::UnboundedReceiver<HubCommand>,
    /// Timers post back through this; weak so dropped handles stop the hub
    loopback: mpsc::WeakUnboundedSender<HubCommand>,
    started_at: Instant,
}

impl Hub {
    async fn run(mut self) {
        let cleared = self.clear_all();
        tracing::info!(
            connections = cleared.connections,
            identities = cleared.state.identities,
            rooms = cleared.state.rooms,
            "Relay state cleared on startup"
        );

        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Open { id, sender } => self.on_open(id, sender),
                HubCommand::Inbound { id, event } => {
                    if !self.connections.contains_key(&id) {
                        tracing::debug!(connection_id = %id, "Event from closed connection ignored");
                        continue;
                    }
                    let out = self.relay.handle(id, event);
                    self.execute(out);
                }
                HubCommand::Malformed { id, error } => {
                    let out = self.relay.reject(id, &error);
                    self.execute(out);
                }
                HubCommand::Closed { id } => self.on_closed(id),
                HubCommand::Fire { token, deferred } => {
                    // Cancelled timers may still have queued their command
                    if self.timers.remove(&token).is_none() {
                        continue;
                    }
                    let out = self.relay.fire(deferred);
                    self.execute(out);
                }
                HubCommand::Stats(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                HubCommand::Shutdown(reply) => {
                    let cleared = self.clear_all();
                    tracing::info!(
                        connections = cleared.connections,
                        identities = cleared.state.identities,
                        calls = cleared.state.calls,
                        pending = cleared.timers,
                        "Relay state cleared on shutdown"
                    );
                    let _ = reply.send(cleared);
                    break;
                }
            }
        }

        let stats = self.relay.stats();
        tracing::info!(
            connections = stats.connections_opened,
            relayed = stats.events_relayed,
            unreachable = stats.peers_unreachable,
            rejected = stats.protocol_errors,
            calls = stats.calls_started,
            "Relay hub stopped"
        );
    }

    fn on_open(&mut self, id: ConnectionId, sender: ConnectionSender) {
        self.relay.stats_mut().connections_opened += 1;
        let _ = sender.send(Outgoing::Event(ServerEvent::Welcome { connection_id: id }));
        self.connections.insert(id, sender);

        tracing::debug!(
            connection_id = %id,
            connections = self.connections.len(),
            "Connection opened"
        );
    }

    fn on_closed(&mut self, id: ConnectionId) {
        // Already force-closed by a clear
        if self.connections.remove(&id).is_none() {
            return;
        }
        self.relay.stats_mut().connections_closed += 1;

        let cancelled = self.cancel_timers_for(id);
        if cancelled > 0 {
            self.relay.stats_mut().events_dropped += cancelled as u64;
            tracing::debug!(connection_id = %id, cancelled = cancelled, "Pending deliveries cancelled");
        }

        let out = self.relay.disconnect(id);
        self.execute(out);
    }

    /// Carry out dispatch instructions in order
    fn execute(&mut self, dispatches: Vec<Dispatch>) {
        let mut queue: VecDeque<Dispatch> = dispatches.into();

        while let Some(dispatch) = queue.pop_front() {
            match dispatch {
                Dispatch::Send { to, event } => {
                    if !self.deliver(to, event) {
                        tracing::debug!(connection_id = %to, "Recipient gone, reply dropped");
                    }
                }
                Dispatch::Forward {
                    origin,
                    to,
                    target,
                    event,
                } => {
                    if self.deliver(to, event) {
                        self.relay.stats_mut().events_relayed += 1;
                    } else {
                        queue.push_back(self.relay.unreachable(origin, target));
                    }
                }
                Dispatch::Defer(deferred) if deferred.after.is_zero() => {
                    queue.extend(self.relay.fire(deferred));
                }
                Dispatch::Defer(deferred) => self.arm_timer(deferred),
            }
        }
    }

    fn deliver(&self, to: ConnectionId, event: ServerEvent) -> bool {
        self.connections
            .get(&to)
            .is_some_and(|sender| sender.send(Outgoing::Event(event)).is_ok())
    }

    fn arm_timer(&mut self, deferred: Deferred) {
        let token = self.next_token;
        self.next_token += 1;

        let origin = deferred.origin;
        let after = deferred.after;
        let loopback = self.loopback.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = loopback.upgrade() {
                let _ = tx.send(HubCommand::Fire { token, deferred });
            }
        });

        self.timers.insert(
            token,
            PendingTimer {
                origin,
                abort: task.abort_handle(),
            },
        );
    }

    fn cancel_timers_for(&mut self, origin: ConnectionId) -> usize {
        let before = self.timers.len();
        self.timers.retain(|_, timer| {
            if timer.origin == origin {
                timer.abort.abort();
                false
            } else {
                true
            }
        });
        before - self.timers.len()
    }

    /// Clear all relay state and force-close every connection
    fn clear_all(&mut self) -> ClearSummary {
        let timers = self.timers.len();
        for (_, timer) in self.timers.drain() {
            timer.abort.abort();
        }

        let connections = self.connections.len();
        for (_, sender) in self.connections.drain() {
            let _ = sender.send(Outgoing::Close);
        }
        self.relay.stats_mut().connections_closed += connections as u64;

        ClearSummary {
            connections,
            timers,
            state: self.relay.reset(),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::new(self.relay.stats().clone(), self.started_at);
        snapshot.registered_identities = self.relay.registry().len();
        snapshot.rooms = self.relay.rooms().room_count();
        snapshot.pending_deliveries = self.timers.len();
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::protocol::SessionDescription;

    const ALICE: ConnectionId = ConnectionId::new(1);
    const BOB: ConnectionId = ConnectionId::new(2);
    const CAROL: ConnectionId = ConnectionId::new(3);

    fn open(hub: &HubHandle, id: ConnectionId) -> UnboundedReceiver<Outgoing> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.open(id, tx).unwrap();
        rx
    }

    async fn next_event(rx: &mut UnboundedReceiver<Outgoing>) -> ServerEvent {
        match rx.recv().await {
            Some(Outgoing::Event(event)) => event,
            other => panic!("expected event, got {:?}", other),
        }
    }

    fn join(hub: &HubHandle, id: ConnectionId, identity: &str, room: &str) {
        hub.inbound(
            id,
            ClientEvent::RoomJoin {
                identity: identity.into(),
                room: room.into(),
            },
        )
        .unwrap();
    }

    fn call_user(hub: &HubHandle, id: ConnectionId, target: &str) {
        hub.inbound(
            id,
            ClientEvent::CallUser {
                target_identity: target.into(),
                offer: SessionDescription::offer("offer-sdp"),
            },
        )
        .unwrap();
    }

    /// Open Alice and Bob, join both to "abc" and drain the join traffic
    async fn joined_pair(
        hub: &HubHandle,
    ) -> (UnboundedReceiver<Outgoing>, UnboundedReceiver<Outgoing>) {
        let mut alice = open(hub, ALICE);
        let mut bob = open(hub, BOB);
        join(hub, ALICE, "alice@x.com", "abc");
        join(hub, BOB, "bob@x.com", "abc");

        assert_eq!(
            next_event(&mut alice).await,
            ServerEvent::Welcome { connection_id: ALICE }
        );
        assert_eq!(
            next_event(&mut alice).await,
            ServerEvent::RoomJoined { room: "abc".into() }
        );
        assert_eq!(
            next_event(&mut alice).await,
            ServerEvent::UserJoined {
                identity: "bob@x.com".into(),
                room: "abc".into()
            }
        );
        assert_eq!(
            next_event(&mut bob).await,
            ServerEvent::Welcome { connection_id: BOB }
        );
        assert_eq!(
            next_event(&mut bob).await,
            ServerEvent::RoomJoined { room: "abc".into() }
        );

        (alice, bob)
    }

    #[tokio::test(start_paused = true)]
    async fn test_incoming_call_after_delay() {
        let (hub, _task) = spawn(RelayConfig::default());
        let (_alice, mut bob) = joined_pair(&hub).await;

        let sent_at = tokio::time::Instant::now();
        call_user(&hub, ALICE, "bob@x.com");

        assert_eq!(
            next_event(&mut bob).await,
            ServerEvent::IncomingCall {
                caller_identity: "alice@x.com".into(),
                offer: SessionDescription::offer("offer-sdp"),
            }
        );
        assert!(sent_at.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_does_not_block_other_connections() {
        let (hub, _task) = spawn(RelayConfig::default());
        let (_alice, mut bob) = joined_pair(&hub).await;

        call_user(&hub, ALICE, "bob@x.com");
        let mut carol = open(&hub, CAROL);
        join(&hub, CAROL, "carol@x.com", "other");

        assert_eq!(
            next_event(&mut carol).await,
            ServerEvent::Welcome { connection_id: CAROL }
        );
        assert_eq!(
            next_event(&mut carol).await,
            ServerEvent::RoomJoined {
                room: "other".into()
            }
        );

        // Carol's join completed while Alice's offer is still waiting
        assert_eq!(bob.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(hub.stats().await.unwrap().pending_deliveries, 1);

        assert!(matches!(
            next_event(&mut bob).await,
            ServerEvent::IncomingCall { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_origin_disconnect_cancels_delivery() {
        let (hub, _task) = spawn(RelayConfig::default());
        let (_alice, mut bob) = joined_pair(&hub).await;

        call_user(&hub, ALICE, "bob@x.com");
        hub.close(ALICE).unwrap();

        // Bob is told the call is over, and never sees the offer
        assert_eq!(next_event(&mut bob).await, ServerEvent::CallEnded);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(bob.try_recv(), Err(TryRecvError::Empty));

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.pending_deliveries, 0);
        assert_eq!(stats.relay.events_dropped, 1);
        assert_eq!(stats.registered_identities, 1);
    }

    fn hang_up(hub: &HubHandle, id: ConnectionId, remote: &str) {
        hub.inbound(
            id,
            ClientEvent::CallEnded {
                room: "abc".into(),
                remote_identity: remote.into(),
            },
        )
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_ended_during_delay_drops_offer() {
        let (hub, _task) = spawn(RelayConfig::default());
        let (_alice, mut bob) = joined_pair(&hub).await;

        call_user(&hub, ALICE, "bob@x.com");
        hang_up(&hub, ALICE, "bob@x.com");

        assert_eq!(next_event(&mut bob).await, ServerEvent::CallEnded);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(bob.try_recv(), Err(TryRecvError::Empty));

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.pending_deliveries, 0);
        assert_eq!(stats.relay.events_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reoffer_within_delay_delivers_only_new_offer() {
        let (hub, _task) = spawn(RelayConfig::default());
        let (_alice, mut bob) = joined_pair(&hub).await;

        hub.inbound(
            ALICE,
            ClientEvent::CallUser {
                target_identity: "bob@x.com".into(),
                offer: SessionDescription::offer("first"),
            },
        )
        .unwrap();
        hang_up(&hub, ALICE, "bob@x.com");
        hub.inbound(
            ALICE,
            ClientEvent::CallUser {
                target_identity: "bob@x.com".into(),
                offer: SessionDescription::offer("second"),
            },
        )
        .unwrap();

        assert_eq!(next_event(&mut bob).await, ServerEvent::CallEnded);
        assert_eq!(
            next_event(&mut bob).await,
            ServerEvent::IncomingCall {
                caller_identity: "alice@x.com".into(),
                offer: SessionDescription::offer("second"),
            }
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(bob.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renegotiation_waits_for_answer_delivery() {
        let config = RelayConfig::default().offer_delay(Duration::ZERO);
        let (hub, _task) = spawn(config);
        let (mut alice, mut bob) = joined_pair(&hub).await;

        call_user(&hub, ALICE, "bob@x.com");
        assert!(matches!(
            next_event(&mut bob).await,
            ServerEvent::IncomingCall { .. }
        ));

        hub.inbound(
            BOB,
            ClientEvent::CallAccepted {
                caller_identity: "alice@x.com".into(),
                answer: SessionDescription::answer("answer-sdp"),
            },
        )
        .unwrap();
        hub.inbound(
            BOB,
            ClientEvent::PeerNegotiationNeeded {
                offer: SessionDescription::offer("reoffer"),
                to: "alice@x.com".into(),
                from: None,
            },
        )
        .unwrap();

        // Refused while the answer is still on its way
        assert!(matches!(
            next_event(&mut bob).await,
            ServerEvent::Error { .. }
        ));

        let sent_at = tokio::time::Instant::now();
        assert_eq!(
            next_event(&mut alice).await,
            ServerEvent::CallAcceptedByCallee {
                answer: SessionDescription::answer("answer-sdp")
            }
        );
        assert!(sent_at.elapsed() >= Duration::from_secs(5));
        assert_eq!(alice.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_to_departed_peer_is_unreachable() {
        let (hub, _task) = spawn(RelayConfig::default());
        let (mut alice, _bob) = joined_pair(&hub).await;

        hub.close(BOB).unwrap();
        call_user(&hub, ALICE, "bob@x.com");

        assert_eq!(
            next_event(&mut alice).await,
            ServerEvent::PeerUnreachable {
                target_identity: "bob@x.com".into()
            }
        );
    }

    #[tokio::test]
    async fn test_send_failure_reported_to_origin() {
        let (hub, _task) = spawn(RelayConfig::immediate());
        let (mut alice, bob) = joined_pair(&hub).await;

        // Bob's socket task died but its close has not reached the hub yet
        drop(bob);
        call_user(&hub, ALICE, "bob@x.com");

        assert_eq!(
            next_event(&mut alice).await,
            ServerEvent::PeerUnreachable {
                target_identity: "bob@x.com".into()
            }
        );
        assert_eq!(hub.stats().await.unwrap().relay.events_relayed, 0);
    }

    #[tokio::test]
    async fn test_malformed_frame_rejected() {
        let (hub, _task) = spawn(RelayConfig::immediate());
        let mut alice = open(&hub, ALICE);
        next_event(&mut alice).await;

        hub.malformed(ALICE, ProtocolError::BinaryFrame).unwrap();

        assert!(matches!(
            next_event(&mut alice).await,
            ServerEvent::Error { event: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_shutdown_force_closes_everything() {
        let (hub, task) = spawn(RelayConfig::default());
        let (mut alice, mut bob) = joined_pair(&hub).await;
        let mut stranger = open(&hub, CAROL);
        next_event(&mut stranger).await;

        let summary = hub.shutdown().await.unwrap();

        assert_eq!(summary.connections, 3);
        assert_eq!(summary.state.identities, 2);
        assert_eq!(alice.recv().await, Some(Outgoing::Close));
        assert_eq!(bob.recv().await, Some(Outgoing::Close));
        assert_eq!(stranger.recv().await, Some(Outgoing::Close));

        tokio_test::assert_ok!(task.await);
        assert!(matches!(hub.stats().await, Err(Error::HubClosed)));
    }

    #[tokio::test]
    async fn test_starts_empty() {
        let (hub, _task) = spawn(RelayConfig::default());

        let stats = hub.stats().await.unwrap();

        assert_eq!(stats.registered_identities, 0);
        assert_eq!(stats.rooms, 0);
        assert_eq!(stats.pending_deliveries, 0);
        assert_eq!(stats.relay.connections_closed, 0);
    }

    #[tokio::test]
    async fn test_events_after_close_ignored() {
        let (hub, _task) = spawn(RelayConfig::immediate());
        let mut alice = open(&hub, ALICE);
        next_event(&mut alice).await;

        hub.close(ALICE).unwrap();
        join(&hub, ALICE, "alice@x.com", "abc");

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.registered_identities, 0);
        assert_eq!(stats.relay.connections_closed, 1);
    }
}
