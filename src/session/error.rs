//! Call state machine errors

/// Why an event was refused by the call state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The sending connection never sent `room-join`
    NotJoined,
    /// Caller and callee are the same identity
    SelfCall,
    /// No call exists between the two identities
    NoSession,
    /// A call exists but is in the wrong phase for this event
    InvalidTransition {
        event: &'static str,
        phase: &'static str,
    },
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::NotJoined => write!(f, "Join a room before signaling"),
            CallError::SelfCall => write!(f, "Cannot call yourself"),
            CallError::NoSession => write!(f, "No active call with that peer"),
            CallError::InvalidTransition { event, phase } => {
                write!(f, "{} is not allowed while the call is {}", event, phase)
            }
        }
    }
}

impl std::error::Error for CallError {}
