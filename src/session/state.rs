//! Call session state machine
//!
//! Tracks one pairwise call from the first offer to hang-up.
//!
//! ```text
//!   (idle) ──call-user──► OfferPending ──call-accepted──► AnswerPending
//!                                                               │
//!                                                answer relayed │
//!                                                               ▼
//!                              peer-negotiation-answer ──►  Connected
//!                                                      ▲       │
//!                                                      │       │ peer-negotiation-needed
//!                                                      │       ▼
//!                                                   Renegotiating
//!
//!   any live phase ──call-ended / disconnect──► Ended
//! ```

use std::time::Instant;

use super::error::CallError;
use crate::registry::{Identity, RoomId};

/// Call lifecycle phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallPhase {
    /// Offer relayed (or pending delivery) to the callee
    OfferPending,
    /// Callee answered; the answer has not reached the caller yet
    AnswerPending,
    /// Answer delivered to the caller, media can flow
    Connected,
    /// A second offer/answer exchange is in flight
    Renegotiating {
        /// Identity that sent the renegotiation offer
        initiator: Identity,
    },
    /// Terminal
    Ended,
}

impl CallPhase {
    pub fn name(&self) -> &'static str {
        match self {
            CallPhase::OfferPending => "offer-pending",
            CallPhase::AnswerPending => "answer-pending",
            CallPhase::Connected => "connected",
            CallPhase::Renegotiating { .. } => "renegotiating",
            CallPhase::Ended => "ended",
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, CallPhase::Ended)
    }
}

impl std::fmt::Display for CallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// State of one call between two identities
#[derive(Debug, Clone)]
pub struct CallSession {
    /// Generation id, unique within one call table
    pub id: u64,

    /// Identity that sent the first offer
    pub caller: Identity,

    /// Identity the first offer was addressed to
    pub callee: Identity,

    /// Room the caller was in when the call started
    pub room: Option<RoomId>,

    /// Current phase
    pub phase: CallPhase,

    /// When the offer was received
    pub started_at: Instant,

    /// When the answer reached the caller
    pub connected_at: Option<Instant>,

    /// Completed renegotiations
    pub renegotiations: u32,
}

impl CallSession {
    /// Start a call in `OfferPending`
    pub fn new(id: u64, caller: &str, callee: &str, room: Option<RoomId>) -> Self {
        Self {
            id,
            caller: caller.to_owned(),
            callee: callee.to_owned(),
            room,
            phase: CallPhase::OfferPending,
            started_at: Instant::now(),
            connected_at: None,
            renegotiations: 0,
        }
    }

    /// The other participant, if `identity` takes part in this call
    pub fn peer_of(&self, identity: &str) -> Option<&Identity> {
        if self.caller == identity {
            Some(&self.callee)
        } else if self.callee == identity {
            Some(&self.caller)
        } else {
            None
        }
    }

    /// `callee` answered `caller`'s offer
    pub fn accept(&mut self, callee: &str, caller: &str) -> Result<(), CallError> {
        if self.phase != CallPhase::OfferPending {
            return Err(self.invalid("call-accepted"));
        }
        if self.caller != caller || self.callee != callee {
            // Only the addressed callee can answer
            return Err(self.invalid("call-accepted"));
        }
        self.phase = CallPhase::AnswerPending;
        Ok(())
    }

    /// The callee's answer was handed to the caller
    pub fn answer_delivered(&mut self) -> Result<(), CallError> {
        if self.phase != CallPhase::AnswerPending {
            return Err(self.invalid("call-accepted-by-callee"));
        }
        self.phase = CallPhase::Connected;
        self.connected_at = Some(Instant::now());
        Ok(())
    }

    /// `initiator` sent a renegotiation offer
    pub fn start_renegotiation(&mut self, initiator: &str) -> Result<(), CallError> {
        if self.phase != CallPhase::Connected {
            return Err(self.invalid("peer-negotiation-needed"));
        }
        self.phase = CallPhase::Renegotiating {
            initiator: initiator.to_owned(),
        };
        Ok(())
    }

    /// `answerer` returned the renegotiation answer to `initiator`
    pub fn finish_renegotiation(&mut self, answerer: &str, initiator: &str) -> Result<(), CallError> {
        match &self.phase {
            CallPhase::Renegotiating { initiator: expected }
                if expected == initiator && answerer != initiator =>
            {
                self.phase = CallPhase::Connected;
                self.renegotiations += 1;
                Ok(())
            }
            _ => Err(self.invalid("peer-negotiation-answer")),
        }
    }

    /// Require `Connected` for `event`
    pub fn require_connected(&self, event: &'static str) -> Result<(), CallError> {
        if self.phase == CallPhase::Connected {
            Ok(())
        } else {
            Err(self.invalid(event))
        }
    }

    /// Move to the terminal phase
    pub fn end(&mut self) {
        self.phase = CallPhase::Ended;
    }

    /// Time since the offer arrived
    pub fn duration(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    fn invalid(&self, event: &'static str) -> CallError {
        CallError::InvalidTransition {
            event,
            phase: self.phase.name(),
        }
    }
}
