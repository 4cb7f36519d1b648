//! Active calls keyed by participant pair

use std::collections::HashMap;

use super::error::CallError;
use super::state::{CallPhase, CallSession};
use crate::registry::{Identity, RoomId};

/// Unordered pair of identities
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey(Identity, Identity);

impl CallKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_owned(), b.to_owned())
        } else {
            Self(b.to_owned(), a.to_owned())
        }
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.0 == identity || self.1 == identity
    }
}

impl std::fmt::Display for CallKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<->{}", self.0, self.1)
    }
}

/// One particular call between a pair
///
/// The same pair can hang up and call again; `id` tells the two sessions
/// apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRef {
    pub key: CallKey,
    pub id: u64,
}

impl std::fmt::Display for CallRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.key, self.id)
    }
}

/// Every live call
#[derive(Debug, Default)]
pub struct CallTable {
    calls: HashMap<CallKey, CallSession>,
    next_id: u64,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a call from `caller` to `callee`
    ///
    /// Fails if the pair already has a live call, whatever its phase.
    pub fn offer(
        &mut self,
        caller: &str,
        callee: &str,
        room: Option<RoomId>,
    ) -> Result<CallRef, CallError> {
        if caller == callee {
            return Err(CallError::SelfCall);
        }

        let key = CallKey::new(caller, callee);
        if let Some(existing) = self.calls.get(&key) {
            return Err(CallError::InvalidTransition {
                event: "call-user",
                phase: existing.phase.name(),
            });
        }

        self.next_id += 1;
        let id = self.next_id;
        self.calls
            .insert(key.clone(), CallSession::new(id, caller, callee, room));
        Ok(CallRef { key, id })
    }

    /// `callee` answered `caller`
    pub fn accept(&mut self, callee: &str, caller: &str) -> Result<CallRef, CallError> {
        let key = CallKey::new(caller, callee);
        let call = self.calls.get_mut(&key).ok_or(CallError::NoSession)?;
        call.accept(callee, caller)?;
        Ok(CallRef { id: call.id, key })
    }

    /// The answer of `call` reached its caller
    pub fn answer_delivered(&mut self, call: &CallRef) -> Result<(), CallError> {
        self.current_mut(call)
            .ok_or(CallError::NoSession)?
            .answer_delivered()
    }

    /// `initiator` wants to renegotiate with `peer`
    pub fn start_renegotiation(&mut self, initiator: &str, peer: &str) -> Result<CallKey, CallError> {
        let key = CallKey::new(initiator, peer);
        self.calls
            .get_mut(&key)
            .ok_or(CallError::NoSession)?
            .start_renegotiation(initiator)?;
        Ok(key)
    }

    /// `answerer` answered the renegotiation started by `initiator`
    pub fn finish_renegotiation(
        &mut self,
        answerer: &str,
        initiator: &str,
    ) -> Result<CallKey, CallError> {
        let key = CallKey::new(answerer, initiator);
        self.calls
            .get_mut(&key)
            .ok_or(CallError::NoSession)?
            .finish_renegotiation(answerer, initiator)?;
        Ok(key)
    }

    /// Look up the call between `a` and `b`, requiring `Connected`
    pub fn require_connected(
        &self,
        a: &str,
        b: &str,
        event: &'static str,
    ) -> Result<&CallSession, CallError> {
        let call = self
            .calls
            .get(&CallKey::new(a, b))
            .ok_or(CallError::NoSession)?;
        call.require_connected(event)?;
        Ok(call)
    }

    /// End the call between `a` and `b`
    pub fn end(&mut self, a: &str, b: &str) -> Result<CallSession, CallError> {
        let mut call = self
            .calls
            .remove(&CallKey::new(a, b))
            .ok_or(CallError::NoSession)?;
        call.end();
        Ok(call)
    }

    /// End every call `identity` takes part in
    pub fn end_all_for(&mut self, identity: &str) -> Vec<CallSession> {
        let keys: Vec<CallKey> = self
            .calls
            .keys()
            .filter(|key| key.contains(identity))
            .cloned()
            .collect();

        keys.into_iter()
            .filter_map(|key| self.calls.remove(&key))
            .map(|mut call| {
                call.end();
                call
            })
            .collect()
    }

    /// The live call between `a` and `b`, if any
    pub fn between(&self, a: &str, b: &str) -> Option<&CallSession> {
        self.calls.get(&CallKey::new(a, b))
    }

    /// Initiator of a renegotiation that `answerer` has yet to answer
    pub fn pending_renegotiation_for(&self, answerer: &str) -> Option<&Identity> {
        self.calls
            .iter()
            .filter(|(key, _)| key.contains(answerer))
            .find_map(|(_, call)| match &call.phase {
                CallPhase::Renegotiating { initiator } if initiator != answerer => Some(initiator),
                _ => None,
            })
    }

    /// Whether `call` is still the live session of its pair and its phase
    /// satisfies `check`
    pub fn is_in_phase(&self, call: &CallRef, check: impl Fn(&CallPhase) -> bool) -> bool {
        self.calls
            .get(&call.key)
            .is_some_and(|session| session.id == call.id && check(&session.phase))
    }

    fn current_mut(&mut self, call: &CallRef) -> Option<&mut CallSession> {
        self.calls
            .get_mut(&call.key)
            .filter(|session| session.id == call.id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Drop every call, returning how many were live
    pub fn clear(&mut self) -> usize {
        let count = self.calls.len();
        self.calls.clear();
        count
    }
}
