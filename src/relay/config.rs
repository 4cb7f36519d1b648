//! Relay configuration

use std::time::Duration;

/// Default pause before an offer is handed to the callee
pub const DEFAULT_OFFER_DELAY: Duration = Duration::from_millis(3_000);

/// Default pause before an answer is handed back to the caller
pub const DEFAULT_ANSWER_DELAY: Duration = Duration::from_millis(6_000);

/// Relay tunables
///
/// The delays give the receiving browser time to finish mounting its media
/// pipeline before it is handed a session description. They pace delivery;
/// they are not part of the protocol contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Wait between `call-user` and `incoming-call`
    pub offer_delay: Duration,

    /// Wait between `call-accepted` and `call-accepted-by-callee`
    pub answer_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            offer_delay: DEFAULT_OFFER_DELAY,
            answer_delay: DEFAULT_ANSWER_DELAY,
        }
    }
}

impl RelayConfig {
    /// Forward everything immediately
    pub fn immediate() -> Self {
        Self {
            offer_delay: Duration::ZERO,
            answer_delay: Duration::ZERO,
        }
    }

    /// Set the offer delay
    pub fn offer_delay(mut self, delay: Duration) -> Self {
        self.offer_delay = delay;
        self
    }

    /// Set the answer delay
    pub fn answer_delay(mut self, delay: Duration) -> Self {
        self.answer_delay = delay;
        self
    }
}
