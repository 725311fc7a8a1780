//! Inbound events processed by the relay.

use courier_protocol::{ChatMessage, ClientFrame, Notification};

use crate::{RoomId, UserId};

/// An event on one connection.
///
/// Every [`ClientFrame`] maps to one variant; `Disconnect` is produced by the
/// gateway when the connection ends, exactly once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Bind the connection to a user.
    Register(UserId),
    /// Join a room.
    JoinRoom(RoomId),
    /// Forward a notification to a user, if online.
    SendNotification(Notification),
    /// Broadcast to a room and notify the receiver.
    ChatMessage(ChatMessage),
    /// The connection is gone.
    Disconnect,
}

impl ClientEvent {
    /// Short name used in logs and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Register(_) => "register",
            ClientEvent::JoinRoom(_) => "joinRoom",
            ClientEvent::SendNotification(_) => "sendNotification",
            ClientEvent::ChatMessage(_) => "chatMessage",
            ClientEvent::Disconnect => "disconnect",
        }
    }
}

impl From<ClientFrame> for ClientEvent {
    fn from(frame: ClientFrame) -> Self {
        match frame {
            ClientFrame::Register(user) => ClientEvent::Register(user),
            ClientFrame::JoinRoom(room) => ClientEvent::JoinRoom(room),
            ClientFrame::SendNotification(notification) => {
                ClientEvent::SendNotification(notification)
            }
            ClientFrame::ChatMessage(message) => ClientEvent::ChatMessage(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_frame() {
        let frame = ClientFrame::ChatMessage(ChatMessage::new("a", "b", "a_b", "hi"));
        let event = ClientEvent::from(frame);
        assert_eq!(event.kind(), "chatMessage");
        assert_eq!(ClientEvent::from(ClientFrame::register("a")), ClientEvent::Register("a".into()));
    }
}
