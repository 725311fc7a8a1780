//! Connection hub for Courier.
//!
//! The hub owns the outbound queue of every live connection and the room
//! groups those connections have joined. It is the [`Gateway`] the relay
//! delivers through.

use crate::room::Room;
use courier_core::{ConnectionId, Gateway, RoomId};
use courier_protocol::ServerFrame;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receiving end of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedReceiver<Arc<ServerFrame>>;

/// The connection table and room groups.
///
/// Outbound queues are unbounded: delivery never waits on a slow client.
#[derive(Default)]
pub struct Hub {
    /// Outbound queue per connection.
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<Arc<ServerFrame>>>,
    /// Rooms indexed by id.
    rooms: DashMap<RoomId, Room>,
    /// Rooms each connection has joined.
    memberships: DashMap<ConnectionId, HashSet<RoomId>>,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connection_count: self.connections.len(),
            room_count: self.rooms.len(),
            total_memberships: self.memberships.iter().map(|m| m.len()).sum(),
        }
    }

    /// Register a live connection and return its outbound queue.
    ///
    /// Attaching an id twice replaces the earlier queue.
    pub fn attach(&self, connection: ConnectionId) -> Outbox {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(connection = %connection, "Connection attached");
        self.connections.insert(connection, tx);
        rx
    }

    /// Forget a connection and remove it from every room.
    ///
    /// Returns the rooms it left.
    pub fn detach(&self, connection: &ConnectionId) -> Vec<RoomId> {
        self.connections.remove(connection);

        let rooms: Vec<RoomId> = self
            .memberships
            .remove(connection)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default();

        for room in &rooms {
            if let Some(mut entry) = self.rooms.get_mut(room) {
                entry.remove(connection);
            }
            if self.rooms.remove_if(room, |_, r| r.is_empty()).is_some() {
                debug!(room = %room, "Deleted empty room");
            }
        }

        debug!(connection = %connection, rooms = rooms.len(), "Connection detached");
        rooms
    }

    /// Add a connection to a room.
    ///
    /// Returns `false` if the connection is not attached.
    pub fn join_room(&self, connection: &ConnectionId, room: &str) -> bool {
        if !self.connections.contains_key(connection) {
            trace!(connection = %connection, room = %room, "Join from detached connection ignored");
            return false;
        }

        self.memberships
            .entry(connection.clone())
            .or_default()
            .insert(room.to_string());

        self.rooms
            .entry(room.to_string())
            .or_insert_with(|| {
                debug!(room = %room, "Creating new room");
                Room::new(room)
            })
            .insert(connection.clone());

        true
    }

    /// Queue a frame for one connection.
    pub fn send(&self, connection: &ConnectionId, frame: Arc<ServerFrame>) -> bool {
        let Some(sender) = self.connections.get(connection) else {
            trace!(connection = %connection, "Send to unknown connection dropped");
            return false;
        };

        if sender.send(frame).is_err() {
            trace!(connection = %connection, "Send to closed connection dropped");
            return false;
        }
        true
    }

    /// Queue a frame for every connection in a room.
    ///
    /// Returns the number of connections that accepted it.
    pub fn broadcast(&self, room: &str, frame: ServerFrame) -> usize {
        let members = match self.rooms.get(room) {
            Some(entry) => entry.members(),
            None => {
                trace!(room = %room, "Broadcast to empty room");
                return 0;
            }
        };

        let frame = Arc::new(frame);
        let delivered = members
            .iter()
            .filter(|member| self.send(member, Arc::clone(&frame)))
            .count();

        trace!(room = %room, recipients = delivered, "Broadcast");
        delivered
    }

    /// Check if a connection is attached.
    #[must_use]
    pub fn is_attached(&self, connection: &ConnectionId) -> bool {
        self.connections.contains_key(connection)
    }

    /// Number of attached connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections in a room.
    #[must_use]
    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map(|r| r.len()).unwrap_or(0)
    }

    /// Check if a connection is in a room.
    #[must_use]
    pub fn is_member(&self, connection: &ConnectionId, room: &str) -> bool {
        self.rooms
            .get(room)
            .map(|r| r.contains(connection))
            .unwrap_or(false)
    }

    /// Rooms a connection has joined.
    #[must_use]
    pub fn rooms_of(&self, connection: &ConnectionId) -> Vec<RoomId> {
        self.memberships
            .get(connection)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Gateway for Hub {
    fn join(&self, connection: &ConnectionId, room: &str) {
        self.join_room(connection, room);
    }

    fn emit_to(&self, connection: &ConnectionId, frame: ServerFrame) -> bool {
        self.send(connection, Arc::new(frame))
    }

    fn emit_to_room(&self, room: &str, frame: ServerFrame) -> usize {
        self.broadcast(room, frame)
    }
}

/// Hub statistics.
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Number of attached connections.
    pub connection_count: usize,
    /// Number of non-empty rooms.
    pub room_count: usize,
    /// Total room memberships across connections.
    pub total_memberships: usize,
}
