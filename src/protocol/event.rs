//! Signaling events
//!
//! Every WebSocket text frame carries exactly one event, encoded as
//! `{"event": "<kebab-case name>", "data": {...}}` with camelCase payload
//! fields. Inbound events come from browsers, outbound events are produced by
//! the relay.

use serde::{Deserialize, Serialize};

use super::error::ProtocolError;
use super::sdp::SessionDescription;
use crate::registry::{ConnectionId, Identity, RoomId};

/// Events sent by a client to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Bind an identity to this connection and join a room
    #[serde(rename_all = "camelCase")]
    RoomJoin { identity: Identity, room: RoomId },

    /// Ask the server for a fresh room code
    CreateRoom,

    /// Offer a call to another identity
    #[serde(rename_all = "camelCase")]
    CallUser {
        target_identity: Identity,
        offer: SessionDescription,
    },

    /// Answer a call offered by `caller_identity`
    #[serde(rename_all = "camelCase")]
    CallAccepted {
        caller_identity: Identity,
        answer: SessionDescription,
    },

    /// Renegotiation offer for the peer `to`
    #[serde(rename_all = "camelCase")]
    PeerNegotiationNeeded {
        offer: SessionDescription,
        to: Identity,
        /// Sender's own connection id; the relay stamps the real one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ConnectionId>,
    },

    /// Renegotiation answer, addressed to the initiator's connection
    #[serde(rename_all = "camelCase")]
    PeerNegotiationAnswer {
        answer: SessionDescription,
        from: ConnectionId,
    },

    /// The caller finished negotiating; the callee should attach tracks
    #[serde(rename_all = "camelCase")]
    NegotiationComplete { callee_identity: Identity },

    /// Hang up
    #[serde(rename_all = "camelCase")]
    CallEnded {
        room: RoomId,
        remote_identity: Identity,
    },
}

impl ClientEvent {
    /// Every inbound event name
    pub const NAMES: [&'static str; 8] = [
        "room-join",
        "create-room",
        "call-user",
        "call-accepted",
        "peer-negotiation-needed",
        "peer-negotiation-answer",
        "negotiation-complete",
        "call-ended",
    ];

    /// Static wire name for a tag read off the wire
    pub fn known_name(tag: &str) -> Option<&'static str> {
        Self::NAMES.iter().copied().find(|name| *name == tag)
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RoomJoin { .. } => "room-join",
            ClientEvent::CreateRoom => "create-room",
            ClientEvent::CallUser { .. } => "call-user",
            ClientEvent::CallAccepted { .. } => "call-accepted",
            ClientEvent::PeerNegotiationNeeded { .. } => "peer-negotiation-needed",
            ClientEvent::PeerNegotiationAnswer { .. } => "peer-negotiation-answer",
            ClientEvent::NegotiationComplete { .. } => "negotiation-complete",
            ClientEvent::CallEnded { .. } => "call-ended",
        }
    }

    /// Check required fields that serde cannot express
    ///
    /// Empty identities and room ids count as missing, and every session
    /// description must match the slot it travels in.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let event = self.name();
        let require = |field: &'static str, value: &str| {
            if value.trim().is_empty() {
                Err(ProtocolError::MissingField { event, field })
            } else {
                Ok(())
            }
        };
        let require_offer = |desc: &SessionDescription| {
            if desc.is_offer() {
                Ok(())
            } else {
                Err(ProtocolError::WrongDescriptionType {
                    event,
                    expected: super::sdp::SdpType::Offer,
                    actual: desc.kind,
                })
            }
        };
        let require_answer = |desc: &SessionDescription| {
            if desc.is_answer() {
                Ok(())
            } else {
                Err(ProtocolError::WrongDescriptionType {
                    event,
                    expected: super::sdp::SdpType::Answer,
                    actual: desc.kind,
                })
            }
        };

        match self {
            ClientEvent::RoomJoin { identity, room } => {
                require("identity", identity)?;
                require("room", room)
            }
            ClientEvent::CreateRoom => Ok(()),
            ClientEvent::CallUser {
                target_identity,
                offer,
            } => {
                require("targetIdentity", target_identity)?;
                require_offer(offer)
            }
            ClientEvent::CallAccepted {
                caller_identity,
                answer,
            } => {
                require("callerIdentity", caller_identity)?;
                require_answer(answer)
            }
            ClientEvent::PeerNegotiationNeeded { offer, to, .. } => {
                require("to", to)?;
                require_offer(offer)
            }
            ClientEvent::PeerNegotiationAnswer { answer, .. } => require_answer(answer),
            ClientEvent::NegotiationComplete { callee_identity } => {
                require("calleeIdentity", callee_identity)
            }
            ClientEvent::CallEnded {
                remote_identity, ..
            } => require("remoteIdentity", remote_identity),
        }
    }
}

/// Events sent by the relay to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// First frame on every connection
    #[serde(rename_all = "camelCase")]
    Welcome { connection_id: ConnectionId },

    /// Acknowledges the sender's own `room-join`
    #[serde(rename_all = "camelCase")]
    RoomJoined { room: RoomId },

    /// Another participant joined a room this connection is in
    #[serde(rename_all = "camelCase")]
    UserJoined { identity: Identity, room: RoomId },

    /// Reply to `create-room`
    #[serde(rename_all = "camelCase")]
    RoomCreated { room: RoomId },

    /// Offer forwarded to the callee
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        caller_identity: Identity,
        offer: SessionDescription,
    },

    /// Answer forwarded to the caller
    #[serde(rename_all = "camelCase")]
    CallAcceptedByCallee { answer: SessionDescription },

    /// Renegotiation offer forwarded to the peer
    #[serde(rename_all = "camelCase")]
    PeerNegotiationNeeded {
        offer: SessionDescription,
        from: ConnectionId,
    },

    /// Renegotiation answer forwarded to the initiator
    #[serde(rename_all = "camelCase")]
    PeerNegotiationDone {
        answer: SessionDescription,
        answerer_identity: Identity,
    },

    /// Tells the callee to attach its outbound tracks
    #[serde(rename_all = "camelCase")]
    AddTrackForCallee { room: RoomId },

    /// The remote side hung up or went away
    CallEnded,

    /// The addressed peer could not be reached
    #[serde(rename_all = "camelCase")]
    PeerUnreachable { target_identity: String },

    /// The sender's event was rejected
    #[serde(rename_all = "camelCase")]
    Error {
        event: Option<String>,
        reason: String,
    },
}

impl ServerEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Welcome { .. } => "welcome",
            ServerEvent::RoomJoined { .. } => "room-joined",
            ServerEvent::UserJoined { .. } => "user-joined",
            ServerEvent::RoomCreated { .. } => "room-created",
            ServerEvent::IncomingCall { .. } => "incoming-call",
            ServerEvent::CallAcceptedByCallee { .. } => "call-accepted-by-callee",
            ServerEvent::PeerNegotiationNeeded { .. } => "peer-negotiation-needed",
            ServerEvent::PeerNegotiationDone { .. } => "peer-negotiation-done",
            ServerEvent::AddTrackForCallee { .. } => "add-track-for-callee",
            ServerEvent::CallEnded => "call-ended",
            ServerEvent::PeerUnreachable { .. } => "peer-unreachable",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Build an `error` event
    pub fn error(event: Option<&str>, reason: impl std::fmt::Display) -> Self {
        ServerEvent::Error {
            event: event.map(str::to_owned),
            reason: reason.to_string(),
        }
    }
}
