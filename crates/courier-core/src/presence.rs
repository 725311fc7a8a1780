//! Presence tracking for Courier.
//!
//! The registry maps each user to the single connection that currently
//! represents them. The last `register` wins; a connection that has been
//! superseded can never evict the newer mapping when it goes away.

use crate::connection::ConnectionId;
use crate::UserId;
use dashmap::DashMap;
use tracing::debug;

/// Registry of online users, shared by every connection handler.
///
/// `register` and `remove_if_current` both take the shard write lock of the
/// user's entry, so a compare-and-delete can never interleave with an
/// overwrite of the same user.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// Map of user ID to the connection currently representing that user.
    entries: DashMap<UserId, ConnectionId>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `user` at `connection`, replacing any earlier mapping.
    ///
    /// Returns the superseded connection, if it differs from `connection`.
    /// The superseded connection is not closed.
    pub fn register(&self, user: impl Into<UserId>, connection: ConnectionId) -> Option<ConnectionId> {
        let user = user.into();
        let previous = self.entries.insert(user.clone(), connection.clone());

        match &previous {
            Some(old) if *old != connection => {
                debug!(user = %user, connection = %connection, superseded = %old, "Presence: user moved");
            }
            Some(_) => {}
            None => debug!(user = %user, connection = %connection, "Presence: user online"),
        }

        previous.filter(|old| *old != connection)
    }

    /// The connection currently representing `user`.
    #[must_use]
    pub fn lookup(&self, user: &str) -> Option<ConnectionId> {
        self.entries.get(user).map(|entry| entry.value().clone())
    }

    /// Remove `user` only if it still maps to `connection`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_if_current(&self, user: &str, connection: &ConnectionId) -> bool {
        let removed = self
            .entries
            .remove_if(user, |_, current| current == connection)
            .is_some();

        if removed {
            debug!(user = %user, connection = %connection, "Presence: user offline");
        }
        removed
    }

    /// All users currently mapped to `connection`.
    #[must_use]
    pub fn users_on(&self, connection: &ConnectionId) -> Vec<UserId> {
        self.entries
            .iter()
            .filter(|entry| entry.value() == connection)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Remove every user still mapped to `connection`.
    ///
    /// Scans the whole registry; each removal goes through
    /// [`remove_if_current`](Self::remove_if_current), so a user who
    /// re-registered elsewhere between the scan and the removal is kept.
    /// Returns the users actually removed.
    pub fn evict_connection(&self, connection: &ConnectionId) -> Vec<UserId> {
        // Collect first: removing while an iterator holds a shard guard deadlocks.
        self.users_on(connection)
            .into_iter()
            .filter(|user| self.remove_if_current(user, connection))
            .collect()
    }

    /// Number of online users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[test]
    fn test_last_register_wins() {
        let presence = PresenceRegistry::new();

        assert_eq!(presence.register("carol", conn("c1")), None);
        assert_eq!(presence.register("carol", conn("c2")), Some(conn("c1")));
        assert_eq!(presence.lookup("carol"), Some(conn("c2")));
        assert_eq!(presence.len(), 1);
    }

    #[test]
    fn test_reregister_same_connection() {
        let presence = PresenceRegistry::new();

        presence.register("carol", conn("c1"));
        assert_eq!(presence.register("carol", conn("c1")), None);
        assert_eq!(presence.lookup("carol"), Some(conn("c1")));
    }

    #[test]
    fn test_remove_if_current() {
        let presence = PresenceRegistry::new();

        presence.register("alice", conn("a"));
        assert!(presence.remove_if_current("alice", &conn("a")));
        assert_eq!(presence.lookup("alice"), None);
        assert!(!presence.remove_if_current("alice", &conn("a")));
        assert!(presence.is_empty());
    }

    #[test]
    fn test_stale_removal_keeps_newer_mapping() {
        let presence = PresenceRegistry::new();

        presence.register("carol", conn("c1"));
        presence.register("carol", conn("c2"));

        assert!(!presence.remove_if_current("carol", &conn("c1")));
        assert_eq!(presence.lookup("carol"), Some(conn("c2")));
    }

    #[test]
    fn test_lookup_unknown_user() {
        let presence = PresenceRegistry::new();
        assert_eq!(presence.lookup("nobody"), None);
    }

    #[test]
    fn test_evict_connection_scans_all_users() {
        let presence = PresenceRegistry::new();

        // One connection registering several identities.
        presence.register("alice", conn("shared"));
        presence.register("alice-alt", conn("shared"));
        presence.register("bob", conn("b"));

        let mut evicted = presence.evict_connection(&conn("shared"));
        evicted.sort();

        assert_eq!(evicted, vec!["alice".to_string(), "alice-alt".to_string()]);
        assert_eq!(presence.len(), 1);
        assert_eq!(presence.lookup("bob"), Some(conn("b")));
    }

    #[test]
    fn test_evict_superseded_connection() {
        let presence = PresenceRegistry::new();

        presence.register("carol", conn("c1"));
        presence.register("carol", conn("c2"));

        assert!(presence.evict_connection(&conn("c1")).is_empty());
        assert_eq!(presence.lookup("carol"), Some(conn("c2")));
    }

    #[test]
    fn test_concurrent_register_and_stale_cleanup() {
        let presence = Arc::new(PresenceRegistry::new());

        for round in 0..200 {
            let user = format!("user-{round}");
            let stale = conn(&format!("old-{round}"));
            let fresh = conn(&format!("new-{round}"));
            presence.register(user.clone(), stale.clone());

            let registering = {
                let presence = Arc::clone(&presence);
                let (user, fresh) = (user.clone(), fresh.clone());
                thread::spawn(move || {
                    presence.register(user, fresh);
                })
            };
            let cleaning = {
                let presence = Arc::clone(&presence);
                thread::spawn(move || {
                    presence.evict_connection(&stale);
                })
            };
            registering.join().unwrap();
            cleaning.join().unwrap();

            // Whatever the interleaving, the fresh mapping survives.
            assert_eq!(presence.lookup(&user), Some(fresh));
        }
    }
}
