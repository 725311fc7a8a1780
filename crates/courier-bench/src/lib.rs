//! Shared fixtures for Courier benchmarks.

use courier_core::{ClientEvent, ConnectionId, PresenceRegistry, Relay, Session};
use courier_gateway::{Hub, Outbox};
use std::sync::Arc;

/// A relay over a fresh hub, with `members` registered connections joined to `room`.
///
/// Returns the relay, each member's session and outbox.
pub fn populated_room(room: &str, members: usize) -> (Relay<Arc<Hub>>, Vec<(Session, Outbox)>) {
    let hub = Arc::new(Hub::new());
    let relay = Relay::new(Arc::new(PresenceRegistry::new()), Arc::clone(&hub));

    let sessions = (0..members)
        .map(|i| {
            let id = ConnectionId::new(format!("conn-{i}"));
            let outbox = hub.attach(id.clone());
            let mut session = Session::new(id);
            relay.dispatch(&mut session, ClientEvent::Register(format!("user-{i}")));
            relay.dispatch(&mut session, ClientEvent::JoinRoom(room.to_string()));
            (session, outbox)
        })
        .collect();

    (relay, sessions)
}

/// Empty every outbox so queues do not grow across iterations.
pub fn drain(sessions: &mut [(Session, Outbox)]) {
    for (_, outbox) in sessions.iter_mut() {
        while outbox.try_recv().is_ok() {}
    }
}
