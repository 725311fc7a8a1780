//! Room abstraction for Courier.
//!
//! Rooms are named groups of connections that receive chat broadcasts. Any
//! string is a valid room id; clients decide how ids are derived.

use courier_core::{ConnectionId, RoomId};
use std::collections::HashSet;
use tracing::debug;

/// A named group of connections.
#[derive(Debug)]
pub struct Room {
    /// Room id.
    id: RoomId,
    /// Connections currently in the room.
    members: HashSet<ConnectionId>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            members: HashSet::new(),
        }
    }

    /// Get the room id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of connections in the room.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the room is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a connection is in the room.
    #[must_use]
    pub fn contains(&self, connection: &ConnectionId) -> bool {
        self.members.contains(connection)
    }

    /// Add a connection.
    ///
    /// Returns `true` if the connection was not already a member.
    pub fn insert(&mut self, connection: ConnectionId) -> bool {
        let added = self.members.insert(connection);
        if added {
            debug!(room = %self.id, members = self.members.len(), "Room member added");
        }
        added
    }

    /// Remove a connection.
    ///
    /// Returns `true` if the connection was a member.
    pub fn remove(&mut self, connection: &ConnectionId) -> bool {
        let removed = self.members.remove(connection);
        if removed {
            debug!(room = %self.id, connection = %connection, "Room member removed");
        }
        removed
    }

    /// All member connection ids.
    #[must_use]
    pub fn members(&self) -> Vec<ConnectionId> {
        self.members.iter().cloned().collect()
    }
}
