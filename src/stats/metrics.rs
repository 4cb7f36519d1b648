//! Statistics for the relay

use std::time::{Duration, Instant};

/// Relay-wide counters
///
/// Owned by the hub task, so plain integers are enough.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Transport connections accepted
    pub connections_opened: u64,
    /// Transport connections closed
    pub connections_closed: u64,
    /// Inbound events that decoded successfully
    pub events_received: u64,
    /// Events delivered to a peer on someone's behalf
    pub events_relayed: u64,
    /// Deferred events dropped because the call or origin went away
    pub events_dropped: u64,
    /// `peer-unreachable` replies sent
    pub peers_unreachable: u64,
    /// Malformed or out-of-phase events rejected
    pub protocol_errors: u64,
    /// Calls that reached `OfferPending`
    pub calls_started: u64,
    /// Calls that reached `Ended`
    pub calls_ended: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections currently open
    pub fn active_connections(&self) -> u64 {
        self.connections_opened
            .saturating_sub(self.connections_closed)
    }

    /// Calls currently live
    pub fn active_calls(&self) -> u64 {
        self.calls_started.saturating_sub(self.calls_ended)
    }
}

/// Counters plus uptime, as handed out by the hub
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub relay: RelayStats,
    /// Identities currently reachable
    pub registered_identities: usize,
    /// Rooms with at least one member
    pub rooms: usize,
    /// Delayed deliveries waiting on their timer
    pub pending_deliveries: usize,
    pub uptime: Duration,
}

impl StatsSnapshot {
    pub fn new(relay: RelayStats, started_at: Instant) -> Self {
        Self {
            relay,
            registered_identities: 0,
            rooms: 0,
            pending_deliveries: 0,
            uptime: started_at.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_stats_new() {
        let stats = RelayStats::new();
        assert_eq!(stats.connections_opened, 0);
        assert_eq!(stats.events_relayed, 0);
        assert_eq!(stats.active_connections(), 0);
        assert_eq!(stats.active_calls(), 0);
    }

    #[test]
    fn test_active_counts() {
        let stats = RelayStats {
            connections_opened: 5,
            connections_closed: 2,
            calls_started: 3,
            calls_ended: 1,
            ..Default::default()
        };

        assert_eq!(stats.active_connections(), 3);
        assert_eq!(stats.active_calls(), 2);
    }

    #[test]
    fn test_active_counts_never_underflow() {
        // A reset can close more than this incarnation opened
        let stats = RelayStats {
            connections_closed: 1,
            ..Default::default()
        };
        assert_eq!(stats.active_connections(), 0);
    }
}
