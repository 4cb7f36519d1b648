//! Connection registry implementation
//!
//! Bidirectional map between participant identities and live connections.
//! This is the only place that answers "who is reachable where".

use std::collections::HashMap;

use super::connection::ConnectionId;
use super::Identity;

/// Identity <-> connection map
///
/// Both directions are always exact inverses of each other. A later
/// registration of the same identity replaces the earlier one (reconnect
/// semantics); a connection that re-registers under another identity gives up
/// its old one.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Identity to the connection currently holding it
    identity_to_connection: HashMap<Identity, ConnectionId>,

    /// Connection to the identity it registered
    connection_to_identity: HashMap<ConnectionId, Identity>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `connection`, overwriting both directions
    ///
    /// Returns the connection that previously held this identity, if any.
    /// That connection stays open and stays in its rooms, but is no longer
    /// reachable by identity.
    pub fn register(&mut self, identity: &str, connection: ConnectionId) -> Option<ConnectionId> {
        // Drop the connection's previous identity so it cannot resolve back here
        if let Some(previous_identity) = self.connection_to_identity.remove(&connection) {
            if previous_identity != identity {
                self.identity_to_connection.remove(&previous_identity);
                tracing::debug!(
                    connection_id = %connection,
                    old_identity = %previous_identity,
                    new_identity = %identity,
                    "Connection changed identity"
                );
            }
        }

        let displaced = self
            .identity_to_connection
            .insert(identity.to_owned(), connection)
            .filter(|old| *old != connection);

        if let Some(old) = displaced {
            self.connection_to_identity.remove(&old);
            tracing::info!(
                identity = %identity,
                old_connection = %old,
                connection_id = %connection,
                "Identity re-registered, previous connection orphaned"
            );
        }

        self.connection_to_identity
            .insert(connection, identity.to_owned());

        displaced
    }

    /// Find the connection currently holding `identity`
    pub fn resolve_connection(&self, identity: &str) -> Option<ConnectionId> {
        self.identity_to_connection.get(identity).copied()
    }

    /// Find the identity registered by `connection`
    pub fn resolve_identity(&self, connection: ConnectionId) -> Option<&Identity> {
        self.connection_to_identity.get(&connection)
    }

    /// Remove both directions for `connection`
    ///
    /// Idempotent. Returns the identity that was released.
    pub fn remove(&mut self, connection: ConnectionId) -> Option<Identity> {
        let identity = self.connection_to_identity.remove(&connection)?;
        if self.identity_to_connection.get(&identity) == Some(&connection) {
            self.identity_to_connection.remove(&identity);
        }
        Some(identity)
    }

    /// Drop every entry, returning how many identities were registered
    pub fn clear(&mut self) -> usize {
        let count = self.identity_to_connection.len();
        self.identity_to_connection.clear();
        self.connection_to_identity.clear();
        count
    }

    /// Number of reachable identities
    pub fn len(&self) -> usize {
        self.identity_to_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identity_to_connection.is_empty()
    }

    /// Check that both maps are exact inverses
    pub fn is_consistent(&self) -> bool {
        self.identity_to_connection.len() == self.connection_to_identity.len()
            && self.identity_to_connection.iter().all(|(identity, conn)| {
                self.connection_to_identity.get(conn) == Some(identity)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ConnectionRegistry::new();

        assert_eq!(registry.register("alice@x.com", conn(1)), None);

        assert_eq!(registry.resolve_connection("alice@x.com"), Some(conn(1)));
        assert_eq!(
            registry.resolve_identity(conn(1)).map(String::as_str),
            Some("alice@x.com")
        );
        assert_eq!(registry.resolve_connection("bob@x.com"), None);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_reconnect_overwrites() {
        let mut registry = ConnectionRegistry::new();

        registry.register("alice@x.com", conn(1));
        let displaced = registry.register("alice@x.com", conn(2));

        assert_eq!(displaced, Some(conn(1)));
        assert_eq!(registry.resolve_connection("alice@x.com"), Some(conn(2)));
        assert_eq!(registry.resolve_identity(conn(1)), None);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_consistent());

        // Disconnect of the orphan must not unbind the new connection
        assert_eq!(registry.remove(conn(1)), None);
        assert_eq!(registry.resolve_connection("alice@x.com"), Some(conn(2)));
    }

    #[test]
    fn test_same_connection_new_identity() {
        let mut registry = ConnectionRegistry::new();

        registry.register("alice@x.com", conn(1));
        registry.register("carol@x.com", conn(1));

        assert_eq!(registry.resolve_connection("alice@x.com"), None);
        assert_eq!(registry.resolve_connection("carol@x.com"), Some(conn(1)));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_rejoin_same_pair_is_noop() {
        let mut registry = ConnectionRegistry::new();

        registry.register("alice@x.com", conn(1));
        assert_eq!(registry.register("alice@x.com", conn(1)), None);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_remove_idempotent() {
        let mut registry = ConnectionRegistry::new();

        registry.register("bob@x.com", conn(2));
        assert_eq!(registry.remove(conn(2)).as_deref(), Some("bob@x.com"));
        assert_eq!(registry.remove(conn(2)), None);
        assert_eq!(registry.resolve_connection("bob@x.com"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bijection_under_random_operations() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut registry = ConnectionRegistry::new();
        let identities = ["a", "b", "c", "d"];
        let mut rng = StdRng::seed_from_u64(0x2545_f491_4f6c_dd1d);

        for _ in 0..2_000 {
            let connection = conn(rng.gen_range(0..6));
            if rng.gen_range(0..3) == 0 {
                registry.remove(connection);
            } else {
                let identity = identities[rng.gen_range(0..identities.len())];
                registry.register(identity, connection);
            }
            assert!(registry.is_consistent());
        }
    }

    #[test]
    fn test_clear() {
        let mut registry = ConnectionRegistry::new();
        registry.register("a", conn(1));
        registry.register("b", conn(2));

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.resolve_identity(conn(1)), None);
    }
}
