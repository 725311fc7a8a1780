//! The relay engine.
//!
//! A [`Relay`] turns inbound [`ClientEvent`]s into presence updates, room
//! joins and outbound frames. Everything is best-effort: unknown receivers
//! and empty rooms are silent no-ops, and nothing is reported back to the
//! sender.

use courier_protocol::{ChatMessage, Notification, ServerFrame};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::connection::{ConnectionId, Session};
use crate::event::ClientEvent;
use crate::gateway::Gateway;
use crate::presence::PresenceRegistry;
use crate::{RoomId, UserId};

/// What a dispatched event did.
///
/// Informational only; callers use it for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The connection now represents `user`.
    Registered {
        user: UserId,
        /// Connection that represented `user` before, if any.
        superseded: Option<ConnectionId>,
    },
    /// The connection joined `room`.
    Joined { room: RoomId },
    /// A notification was forwarded, or dropped because the receiver is offline.
    Notified { receiver: UserId, delivered: bool },
    /// A chat message was broadcast.
    Relayed {
        room: RoomId,
        /// Connections in the room that were handed the message.
        recipients: usize,
        /// Whether the receiver got a direct chat notification.
        receiver_notified: bool,
    },
    /// The connection closed; `evicted` lists users that went offline.
    Disconnected { evicted: Vec<UserId> },
    /// The session was already closed.
    Ignored,
}

/// Relay engine shared by every connection handler.
pub struct Relay<G> {
    presence: Arc<PresenceRegistry>,
    gateway: G,
}

impl<G: Gateway> Relay<G> {
    /// Create a relay over a presence registry and a gateway.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>, gateway: G) -> Self {
        Self { presence, gateway }
    }

    /// The presence registry this relay writes to.
    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// The gateway this relay delivers through.
    #[must_use]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Apply one event from `session`'s connection.
    pub fn dispatch(&self, session: &mut Session, event: ClientEvent) -> Outcome {
        if session.is_closed() {
            trace!(connection = %session.id(), event = event.kind(), "Event after close ignored");
            return Outcome::Ignored;
        }

        match event {
            ClientEvent::Register(user) => self.register(session, user),
            ClientEvent::JoinRoom(room) => self.join_room(session, room),
            ClientEvent::SendNotification(notification) => self.send_notification(notification),
            ClientEvent::ChatMessage(message) => self.chat_message(session, message),
            ClientEvent::Disconnect => self.disconnect(session),
        }
    }

    fn register(&self, session: &mut Session, user: UserId) -> Outcome {
        let superseded = self.presence.register(user.clone(), session.id().clone());
        session.mark_registered(user.clone());

        debug!(user = %user, connection = %session.id(), "User registered");
        Outcome::Registered { user, superseded }
    }

    fn join_room(&self, session: &Session, room: RoomId) -> Outcome {
        self.gateway.join(session.id(), &room);

        debug!(connection = %session.id(), room = %room, "Joined room");
        Outcome::Joined { room }
    }

    fn send_notification(&self, notification: Notification) -> Outcome {
        let receiver = notification.receiver_id.clone();

        let delivered = match self.presence.lookup(&receiver) {
            Some(target) => {
                let delivered = self
                    .gateway
                    .emit_to(&target, ServerFrame::Notification(notification));
                debug!(receiver = %receiver, connection = %target, delivered, "Notification sent");
                delivered
            }
            None => {
                debug!(receiver = %receiver, "Notification dropped, receiver offline");
                false
            }
        };

        Outcome::Notified { receiver, delivered }
    }

    fn chat_message(&self, session: &Session, message: ChatMessage) -> Outcome {
        let room = message.room_id.clone();
        let receiver = message.receiver_id.clone();
        let notification = Notification::chat(receiver.clone(), &message.sender_id);

        debug!(
            sender = %message.sender_id,
            room = %room,
            connection = %session.id(),
            "Chat message"
        );

        let recipients = self
            .gateway
            .emit_to_room(&room, ServerFrame::NewMessage(message));

        // The receiver is notified even when not in the room.
        let receiver_notified = match self.presence.lookup(&receiver) {
            Some(target) if target != *session.id() => self
                .gateway
                .emit_to(&target, ServerFrame::Notification(notification)),
            _ => false,
        };

        trace!(room = %room, recipients, receiver_notified, "Chat message relayed");
        Outcome::Relayed {
            room,
            recipients,
            receiver_notified,
        }
    }

    fn disconnect(&self, session: &mut Session) -> Outcome {
        let evicted = self.presence.evict_connection(session.id());
        session.close();

        for user in &evicted {
            debug!(user = %user, connection = %session.id(), "User disconnected and removed from presence");
        }
        Outcome::Disconnected { evicted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_protocol::CHAT_NOTIFICATION_TYPE;
    use parking_lot::Mutex;
    use std::collections::{BTreeSet, HashMap};

    /// Gateway that records every delivery.
    #[derive(Default)]
    struct RecordingGateway {
        rooms: Mutex<HashMap<String, BTreeSet<ConnectionId>>>,
        sent: Mutex<Vec<(ConnectionId, ServerFrame)>>,
    }

    impl RecordingGateway {
        fn received(&self, connection: &str) -> Vec<ServerFrame> {
            self.sent
                .lock()
                .iter()
                .filter(|(target, _)| target.as_str() == connection)
                .map(|(_, frame)| frame.clone())
                .collect()
        }

        fn total_sent(&self) -> usize {
            self.sent.lock().len()
        }
    }

    impl Gateway for RecordingGateway {
        fn join(&self, connection: &ConnectionId, room: &str) {
            self.rooms
                .lock()
                .entry(room.to_string())
                .or_default()
                .insert(connection.clone());
        }

        fn emit_to(&self, connection: &ConnectionId, frame: ServerFrame) -> bool {
            self.sent.lock().push((connection.clone(), frame));
            true
        }

        fn emit_to_room(&self, room: &str, frame: ServerFrame) -> usize {
            let members: Vec<ConnectionId> = self
                .rooms
                .lock()
                .get(room)
                .map(|m| m.iter().cloned().collect())
                .unwrap_or_default();
            for member in &members {
                self.emit_to(member, frame.clone());
            }
            members.len()
        }
    }

    fn relay() -> Relay<Arc<RecordingGateway>> {
        Relay::new(
            Arc::new(PresenceRegistry::new()),
            Arc::new(RecordingGateway::default()),
        )
    }

    fn session(id: &str) -> Session {
        Session::new(ConnectionId::new(id))
    }

    #[test]
    fn test_register_sets_presence() {
        let relay = relay();
        let mut a = session("A");

        let outcome = relay.dispatch(&mut a, ClientEvent::Register("alice".into()));
        assert_eq!(
            outcome,
            Outcome::Registered {
                user: "alice".into(),
                superseded: None
            }
        );
        assert_eq!(relay.presence().lookup("alice"), Some(ConnectionId::new("A")));
        assert_eq!(a.user(), Some("alice"));
    }

    #[test]
    fn test_notification_to_online_user() {
        let relay = relay();
        let (mut a, mut b) = (session("A"), session("B"));
        relay.dispatch(&mut b, ClientEvent::Register("bob".into()));

        let notification = Notification::new("bob", "friendRequest", "alice wants to be friends");
        let outcome = relay.dispatch(&mut a, ClientEvent::SendNotification(notification.clone()));

        assert_eq!(
            outcome,
            Outcome::Notified {
                receiver: "bob".into(),
                delivered: true
            }
        );
        assert_eq!(
            relay.gateway().received("B"),
            vec![ServerFrame::Notification(notification)]
        );
    }

    #[test]
    fn test_notification_to_offline_user_is_dropped() {
        let relay = relay();
        let mut a = session("A");

        let outcome = relay.dispatch(
            &mut a,
            ClientEvent::SendNotification(Notification::new("ghost", "like", "x")),
        );

        assert_eq!(
            outcome,
            Outcome::Notified {
                receiver: "ghost".into(),
                delivered: false
            }
        );
        assert_eq!(relay.gateway().total_sent(), 0);
    }

    #[test]
    fn test_chat_between_two_users() {
        let relay = relay();
        let (mut a, mut b) = (session("A"), session("B"));
        relay.dispatch(&mut a, ClientEvent::Register("alice".into()));
        relay.dispatch(&mut b, ClientEvent::Register("bob".into()));
        relay.dispatch(&mut a, ClientEvent::JoinRoom("alice_bob".into()));
        relay.dispatch(&mut b, ClientEvent::JoinRoom("alice_bob".into()));

        let message = ChatMessage::new("alice", "bob", "alice_bob", "hi");
        let outcome = relay.dispatch(&mut a, ClientEvent::ChatMessage(message.clone()));

        assert_eq!(
            outcome,
            Outcome::Relayed {
                room: "alice_bob".into(),
                recipients: 2,
                receiver_notified: true
            }
        );
        assert_eq!(
            relay.gateway().received("A"),
            vec![ServerFrame::NewMessage(message.clone())]
        );
        assert_eq!(
            relay.gateway().received("B"),
            vec![
                ServerFrame::NewMessage(message),
                ServerFrame::Notification(Notification::new(
                    "bob",
                    CHAT_NOTIFICATION_TYPE,
                    "New message from alice"
                )),
            ]
        );
    }

    #[test]
    fn test_chat_only_reaches_room_members() {
        let relay = relay();
        let (mut a, mut b, mut c) = (session("A"), session("B"), session("C"));
        relay.dispatch(&mut a, ClientEvent::JoinRoom("r1".into()));
        relay.dispatch(&mut b, ClientEvent::JoinRoom("r1".into()));
        relay.dispatch(&mut c, ClientEvent::JoinRoom("r2".into()));

        let message = ChatMessage::new("x", "nobody", "r1", "hello");
        relay.dispatch(&mut a, ClientEvent::ChatMessage(message));

        assert_eq!(relay.gateway().received("A").len(), 1);
        assert_eq!(relay.gateway().received("B").len(), 1);
        assert!(relay.gateway().received("C").is_empty());
    }

    #[test]
    fn test_receiver_outside_room_still_notified() {
        let relay = relay();
        let (mut a, mut b) = (session("A"), session("B"));
        relay.dispatch(&mut b, ClientEvent::Register("bob".into()));
        relay.dispatch(&mut a, ClientEvent::JoinRoom("alice_bob".into()));

        relay.dispatch(
            &mut a,
            ClientEvent::ChatMessage(ChatMessage::new("alice", "bob", "alice_bob", "hi")),
        );

        assert_eq!(
            relay.gateway().received("B"),
            vec![ServerFrame::Notification(Notification::chat("bob", "alice"))]
        );
    }

    #[test]
    fn test_no_notification_to_self() {
        let relay = relay();
        let mut a = session("A");
        relay.dispatch(&mut a, ClientEvent::Register("alice".into()));
        relay.dispatch(&mut a, ClientEvent::JoinRoom("notes".into()));

        let outcome = relay.dispatch(
            &mut a,
            ClientEvent::ChatMessage(ChatMessage::new("alice", "alice", "notes", "memo")),
        );

        assert_eq!(
            outcome,
            Outcome::Relayed {
                room: "notes".into(),
                recipients: 1,
                receiver_notified: false
            }
        );
        assert_eq!(relay.gateway().received("A").len(), 1);
    }

    #[test]
    fn test_stale_disconnect_keeps_reconnected_user() {
        let relay = relay();
        let (mut c1, mut c2) = (session("C1"), session("C2"));
        relay.dispatch(&mut c1, ClientEvent::Register("carol".into()));
        let outcome = relay.dispatch(&mut c2, ClientEvent::Register("carol".into()));
        assert_eq!(
            outcome,
            Outcome::Registered {
                user: "carol".into(),
                superseded: Some(ConnectionId::new("C1"))
            }
        );

        let outcome = relay.dispatch(&mut c1, ClientEvent::Disconnect);

        assert_eq!(outcome, Outcome::Disconnected { evicted: vec![] });
        assert_eq!(relay.presence().lookup("carol"), Some(ConnectionId::new("C2")));
    }

    #[test]
    fn test_disconnect_removes_presence_and_closes() {
        let relay = relay();
        let mut a = session("A");
        relay.dispatch(&mut a, ClientEvent::Register("alice".into()));

        let outcome = relay.dispatch(&mut a, ClientEvent::Disconnect);
        assert_eq!(
            outcome,
            Outcome::Disconnected {
                evicted: vec!["alice".into()]
            }
        );
        assert!(a.is_closed());
        assert!(relay.presence().is_empty());

        // Nothing is processed after close.
        assert_eq!(
            relay.dispatch(&mut a, ClientEvent::Register("alice".into())),
            Outcome::Ignored
        );
        assert_eq!(relay.dispatch(&mut a, ClientEvent::Disconnect), Outcome::Ignored);
        assert!(relay.presence().is_empty());
    }
}
