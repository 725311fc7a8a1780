//! Outbound seam between the relay and the connection layer.

use courier_protocol::ServerFrame;

use crate::connection::ConnectionId;

/// Delivery and grouping primitives the relay needs from the connection layer.
///
/// Delivery is fire-and-forget: implementations must swallow failures to
/// reach closed connections and never block on a slow one. Leaving rooms is
/// not part of the trait; implementations tear membership down themselves
/// when a connection ends.
pub trait Gateway: Send + Sync {
    /// Add `connection` to `room`. Idempotent.
    fn join(&self, connection: &ConnectionId, room: &str);

    /// Deliver a frame to one connection.
    ///
    /// Returns `true` if the frame was handed to a live connection.
    fn emit_to(&self, connection: &ConnectionId, frame: ServerFrame) -> bool;

    /// Deliver a frame to every connection currently in `room`.
    ///
    /// Returns the number of connections the frame was handed to.
    fn emit_to_room(&self, room: &str, frame: ServerFrame) -> usize;
}

impl<G: Gateway + ?Sized> Gateway for std::sync::Arc<G> {
    fn join(&self, connection: &ConnectionId, room: &str) {
        (**self).join(connection, room);
    }

    fn emit_to(&self, connection: &ConnectionId, frame: ServerFrame) -> bool {
        (**self).emit_to(connection, frame)
    }

    fn emit_to_room(&self, room: &str, frame: ServerFrame) -> usize {
        (**self).emit_to_room(room, frame)
    }
}
