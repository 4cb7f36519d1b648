//! Negotiation relay
//!
//! Maps each inbound event to the outbound events it causes. Every handler
//! resolves its target through the registry, validates the event against the
//! call state machine and returns [`Dispatch`] instructions; nothing here
//! blocks or performs I/O.

use crate::protocol::{ClientEvent, ProtocolError, ServerEvent, SessionDescription};
use crate::registry::{
    generate_room_code, ConnectionId, ConnectionRegistry, Identity, RoomId, RoomMembership,
};
use crate::session::{CallError, CallPhase, CallTable};
use crate::stats::RelayStats;

use super::config::RelayConfig;
use super::dispatch::{Deferred, Dispatch};

type HandlerResult = Result<Vec<Dispatch>, CallError>;

/// What a reset cleared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetSummary {
    pub identities: usize,
    pub rooms: usize,
    pub calls: usize,
}

/// Registry, rooms and calls, plus the handlers that mutate them
///
/// The relay has a single owner (the hub task), so no locking is needed.
#[derive(Debug)]
pub struct Relay {
    config: RelayConfig,
    registry: ConnectionRegistry,
    rooms: RoomMembership,
    calls: CallTable,
    stats: RelayStats,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            registry: ConnectionRegistry::new(),
            rooms: RoomMembership::new(),
            calls: CallTable::new(),
            stats: RelayStats::new(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomMembership {
        &self.rooms
    }

    pub fn calls(&self) -> &CallTable {
        &self.calls
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut RelayStats {
        &mut self.stats
    }

    /// Handle one decoded inbound event from `from`
    pub fn handle(&mut self, from: ConnectionId, event: ClientEvent) -> Vec<Dispatch> {
        self.stats.events_received += 1;
        let name = event.name();

        let result = match event {
            ClientEvent::RoomJoin { identity, room } => Ok(self.room_join(from, identity, room)),
            ClientEvent::CreateRoom => Ok(self.create_room(from)),
            ClientEvent::CallUser {
                target_identity,
                offer,
            } => self.call_user(from, target_identity, offer),
            ClientEvent::CallAccepted {
                caller_identity,
                answer,
            } => self.call_accepted(from, caller_identity, answer),
            ClientEvent::PeerNegotiationNeeded {
                offer,
                to,
                from: claimed,
            } => self.negotiation_needed(from, offer, to, claimed),
            ClientEvent::PeerNegotiationAnswer {
                answer,
                from: initiator,
            } => self.negotiation_answer(from, answer, initiator),
            ClientEvent::NegotiationComplete { callee_identity } => {
                self.negotiation_complete(from, callee_identity)
            }
            ClientEvent::CallEnded {
                room,
                remote_identity,
            } => self.call_ended(from, room, remote_identity),
        };

        match result {
            Ok(dispatches) => dispatches,
            Err(err) => {
                self.stats.protocol_errors += 1;
                tracing::warn!(
                    connection_id = %from,
                    event = name,
                    error = %err,
                    "Event rejected"
                );
                vec![Dispatch::Send {
                    to: from,
                    event: ServerEvent::error(Some(name), err),
                }]
            }
        }
    }

    /// Reject a frame that failed to decode or validate
    pub fn reject(&mut self, from: ConnectionId, error: &ProtocolError) -> Vec<Dispatch> {
        self.stats.protocol_errors += 1;
        tracing::warn!(connection_id = %from, error = %error, "Malformed event rejected");
        vec![Dispatch::Send {
            to: from,
            event: ServerEvent::error(error.event(), error),
        }]
    }

    /// A pacing timer elapsed
    ///
    /// The event is only delivered into the exact call session that armed
    /// the timer, and only while that session is still waiting for it.
    /// Delivering a delayed answer is what moves the call to `Connected`.
    pub fn fire(&mut self, deferred: Deferred) -> Vec<Dispatch> {
        let Deferred {
            origin,
            target,
            call,
            event,
            ..
        } = deferred;

        let awaited = match &event {
            ServerEvent::IncomingCall { .. } => CallPhase::OfferPending,
            ServerEvent::CallAcceptedByCallee { .. } => CallPhase::AnswerPending,
            _ => CallPhase::Connected,
        };

        if !self.calls.is_in_phase(&call, |phase| *phase == awaited) {
            self.stats.events_dropped += 1;
            tracing::debug!(
                call = %call,
                event = event.name(),
                "Call ended before delayed delivery, dropping"
            );
            return Vec::new();
        }

        let Some(to) = self.registry.resolve_connection(&target) else {
            return vec![self.unreachable(origin, target)];
        };

        if awaited == CallPhase::AnswerPending {
            if let Err(err) = self.calls.answer_delivered(&call) {
                self.stats.events_dropped += 1;
                tracing::debug!(call = %call, error = %err, "Answer no longer expected, dropping");
                return Vec::new();
            }
        }

        tracing::debug!(
            origin = %origin,
            target = %target,
            event = event.name(),
            "Delivering delayed event"
        );
        vec![Dispatch::Forward {
            origin,
            to,
            target,
            event,
        }]
    }

    /// Transport closed
    ///
    /// Drops the connection from its rooms and, if it still owned its
    /// identity, releases the identity and ends that identity's calls. The
    /// remote side of each ended call is told with `call-ended`.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Vec<Dispatch> {
        self.rooms.leave_all(connection);

        let Some(identity) = self.registry.remove(connection) else {
            tracing::debug!(connection_id = %connection, "Unregistered connection closed");
            return Vec::new();
        };

        let ended = self.calls.end_all_for(&identity);
        self.stats.calls_ended += ended.len() as u64;

        tracing::info!(
            connection_id = %connection,
            identity = %identity,
            calls_ended = ended.len(),
            "Participant disconnected"
        );

        ended
            .iter()
            .filter_map(|call| call.peer_of(&identity))
            .filter_map(|peer| self.registry.resolve_connection(peer))
            .map(|to| Dispatch::Send {
                to,
                event: ServerEvent::CallEnded,
            })
            .collect()
    }

    /// Forget everything
    pub fn reset(&mut self) -> ResetSummary {
        ResetSummary {
            identities: self.registry.clear(),
            rooms: self.rooms.clear(),
            calls: self.calls.clear(),
        }
    }

    /// Build the `peer-unreachable` reply for `origin`
    pub(crate) fn unreachable(&mut self, origin: ConnectionId, target: impl Into<String>) -> Dispatch {
        let target = target.into();
        self.stats.peers_unreachable += 1;
        tracing::warn!(origin = %origin, target = %target, "Peer unreachable");
        Dispatch::Send {
            to: origin,
            event: ServerEvent::PeerUnreachable {
                target_identity: target,
            },
        }
    }

    // ---- Individual handlers ---------------------------------------------

    fn room_join(&mut self, from: ConnectionId, identity: Identity, room: RoomId) -> Vec<Dispatch> {
        self.registry.register(&identity, from);
        self.rooms.join(&room, from);

        tracing::info!(
            connection_id = %from,
            identity = %identity,
            room = %room,
            members = self.rooms.member_count(&room),
            "Joined room"
        );

        let mut out = vec![Dispatch::Send {
            to: from,
            event: ServerEvent::RoomJoined { room: room.clone() },
        }];

        out.extend(
            self.rooms
                .members_except(&room, from)
                .into_iter()
                .map(|to| Dispatch::Send {
                    to,
                    event: ServerEvent::UserJoined {
                        identity: identity.clone(),
                        room: room.clone(),
                    },
                }),
        );

        out
    }

    fn create_room(&mut self, from: ConnectionId) -> Vec<Dispatch> {
        let room = generate_room_code();
        tracing::debug!(connection_id = %from, room = %room, "Room code issued");
        vec![Dispatch::Send {
            to: from,
            event: ServerEvent::RoomCreated { room },
        }]
    }

    fn call_user(
        &mut self,
        from: ConnectionId,
        callee: Identity,
        offer: SessionDescription,
    ) -> HandlerResult {
        let caller = self.sender_identity(from)?;

        if self.registry.resolve_connection(&callee).is_none() {
            return Ok(vec![self.unreachable(from, callee)]);
        }

        let room = self.rooms.current_room(from).cloned();
        let call = self.calls.offer(&caller, &callee, room)?;
        self.stats.calls_started += 1;

        tracing::info!(
            caller = %caller,
            callee = %callee,
            delay_ms = self.config.offer_delay.as_millis() as u64,
            "Call offered"
        );

        Ok(vec![Dispatch::Defer(Deferred {
            origin: from,
            target: callee,
            call,
            after: self.config.offer_delay,
            event: ServerEvent::IncomingCall {
                caller_identity: caller,
                offer,
            },
        })])
    }

    fn call_accepted(
        &mut self,
        from: ConnectionId,
        caller: Identity,
        answer: SessionDescription,
    ) -> HandlerResult {
        let callee = self.sender_identity(from)?;
        let call = self.calls.accept(&callee, &caller)?;

        tracing::info!(
            caller = %caller,
            callee = %callee,
            delay_ms = self.config.answer_delay.as_millis() as u64,
            "Call accepted"
        );

        Ok(vec![Dispatch::Defer(Deferred {
            origin: from,
            target: caller,
            call,
            after: self.config.answer_delay,
            event: ServerEvent::CallAcceptedByCallee { answer },
        })])
    }

    fn negotiation_needed(
        &mut self,
        from: ConnectionId,
        offer: SessionDescription,
        peer: Identity,
        claimed: Option<ConnectionId>,
    ) -> HandlerResult {
        let initiator = self.sender_identity(from)?;

        if let Some(claimed) = claimed.filter(|claimed| *claimed != from) {
            tracing::warn!(
                connection_id = %from,
                claimed = %claimed,
                "Client sent a foreign connection id, using its own"
            );
        }

        let Some(to) = self.registry.resolve_connection(&peer) else {
            return Ok(vec![self.unreachable(from, peer)]);
        };
        self.calls.start_renegotiation(&initiator, &peer)?;

        tracing::debug!(initiator = %initiator, peer = %peer, "Renegotiation offer relayed");

        Ok(vec![Dispatch::Forward {
            origin: from,
            to,
            target: peer,
            event: ServerEvent::PeerNegotiationNeeded { offer, from },
        }])
    }

    fn negotiation_answer(
        &mut self,
        from: ConnectionId,
        answer: SessionDescription,
        initiator_connection: ConnectionId,
    ) -> HandlerResult {
        let answerer = self.sender_identity(from)?;

        let Some(initiator) = self.registry.resolve_identity(initiator_connection).cloned() else {
            let target = self
                .renegotiation_initiator(&answerer)
                .unwrap_or_else(|| initiator_connection.to_string());
            return Ok(vec![self.unreachable(from, target)]);
        };
        self.calls.finish_renegotiation(&answerer, &initiator)?;

        tracing::debug!(answerer = %answerer, initiator = %initiator, "Renegotiation answer relayed");

        Ok(vec![Dispatch::Forward {
            origin: from,
            to: initiator_connection,
            target: initiator,
            event: ServerEvent::PeerNegotiationDone {
                answer,
                answerer_identity: answerer,
            },
        }])
    }

    fn negotiation_complete(&mut self, from: ConnectionId, callee: Identity) -> HandlerResult {
        let caller = self.sender_identity(from)?;

        let Some(to) = self.registry.resolve_connection(&callee) else {
            return Ok(vec![self.unreachable(from, callee)]);
        };
        let call = self
            .calls
            .require_connected(&caller, &callee, "negotiation-complete")?;

        let room = call
            .room
            .clone()
            .or_else(|| self.rooms.current_room(from).cloned())
            .unwrap_or_default();

        tracing::debug!(caller = %caller, callee = %callee, room = %room, "Callee asked to add tracks");

        Ok(vec![Dispatch::Forward {
            origin: from,
            to,
            target: callee,
            event: ServerEvent::AddTrackForCallee { room },
        }])
    }

    fn call_ended(&mut self, from: ConnectionId, room: RoomId, remote: Identity) -> HandlerResult {
        let me = self.sender_identity(from)?;
        let call = self.calls.end(&me, &remote)?;
        self.stats.calls_ended += 1;

        tracing::info!(
            identity = %me,
            remote = %remote,
            room = %room,
            duration_ms = call.duration().as_millis() as u64,
            "Call ended"
        );

        match self.registry.resolve_connection(&remote) {
            Some(to) => Ok(vec![Dispatch::Forward {
                origin: from,
                to,
                target: remote,
                event: ServerEvent::CallEnded,
            }]),
            None => Ok(vec![self.unreachable(from, remote)]),
        }
    }

    fn sender_identity(&self, from: ConnectionId) -> Result<Identity, CallError> {
        self.registry
            .resolve_identity(from)
            .cloned()
            .ok_or(CallError::NotJoined)
    }

    /// Identity that started the renegotiation `answerer` is expected to answer
    fn renegotiation_initiator(&self, answerer: &str) -> Option<Identity> {
        self.calls.pending_renegotiation_for(answerer).cloned()
    }
}
