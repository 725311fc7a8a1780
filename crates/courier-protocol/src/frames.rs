//! Frame types for the Courier protocol.
//!
//! Every frame travels in the same envelope, `{"event": <name>, "data": <payload>}`,
//! whichever encoding the connection negotiated.

use serde::{Deserialize, Serialize};

/// Event type of a synthesized chat notification.
pub const CHAT_NOTIFICATION_TYPE: &str = "chat";

/// A chat message relayed to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Author of the message.
    pub sender_id: String,
    /// Intended recipient, notified directly when online.
    pub receiver_id: String,
    /// Room the message is broadcast to.
    pub room_id: String,
    /// Message body.
    pub text: String,
}

impl ChatMessage {
    /// Create a new chat message.
    #[must_use]
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        room_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            room_id: room_id.into(),
            text: text.into(),
        }
    }
}

/// A notification addressed to a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// User the notification is for.
    pub receiver_id: String,
    /// Free-form notification type ("chat", "friendRequest", ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable text.
    pub message: String,
}

impl Notification {
    /// Create a new notification.
    #[must_use]
    pub fn new(
        receiver_id: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            receiver_id: receiver_id.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The notification sent to the receiver of a chat message.
    #[must_use]
    pub fn chat(receiver_id: impl Into<String>, sender_id: &str) -> Self {
        Self::new(
            receiver_id,
            CHAT_NOTIFICATION_TYPE,
            format!("New message from {sender_id}"),
        )
    }
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Bind the sending connection to a user identity.
    Register(String),
    /// Join a room by id.
    JoinRoom(String),
    /// Deliver a notification to a user, if online.
    SendNotification(Notification),
    /// Broadcast a chat message to a room.
    ChatMessage(ChatMessage),
}

impl ClientFrame {
    /// Wire name of the event.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientFrame::Register(_) => "register",
            ClientFrame::JoinRoom(_) => "joinRoom",
            ClientFrame::SendNotification(_) => "sendNotification",
            ClientFrame::ChatMessage(_) => "chatMessage",
        }
    }

    /// Create a new register frame.
    #[must_use]
    pub fn register(user_id: impl Into<String>) -> Self {
        ClientFrame::Register(user_id.into())
    }

    /// Create a new join-room frame.
    #[must_use]
    pub fn join_room(room_id: impl Into<String>) -> Self {
        ClientFrame::JoinRoom(room_id.into())
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Connection established.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Identifier assigned to this connection.
        connection_id: String,
        /// Negotiated protocol major version.
        version: u8,
        /// Heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// A notification for the connected user.
    Notification(Notification),

    /// A chat message broadcast to a joined room.
    NewMessage(ChatMessage),
}

impl ServerFrame {
    /// Wire name of the event.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerFrame::Connected { .. } => "connected",
            ServerFrame::Notification(_) => "notification",
            ServerFrame::NewMessage(_) => "newMessage",
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        ServerFrame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }
}
