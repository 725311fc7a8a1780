//! # courier-gateway
//!
//! Connection table and room groups for Courier.
//!
//! The [`Hub`] holds an outbound queue per live connection and the rooms
//! those connections have joined. It implements [`courier_core::Gateway`],
//! so the relay can deliver by connection id or by room:
//!
//! ```rust
//! use courier_core::ConnectionId;
//! use courier_gateway::Hub;
//! use courier_protocol::{ChatMessage, ServerFrame};
//!
//! let hub = Hub::new();
//! let id = ConnectionId::generate();
//! let mut outbox = hub.attach(id.clone());
//!
//! hub.join_room(&id, "alice_bob");
//! let frame = ServerFrame::NewMessage(ChatMessage::new("alice", "bob", "alice_bob", "hi"));
//! assert_eq!(hub.broadcast("alice_bob", frame), 1);
//! assert!(outbox.try_recv().is_ok());
//!
//! // Detaching leaves every room.
//! hub.detach(&id);
//! assert_eq!(hub.room_size("alice_bob"), 0);
//! ```

pub mod hub;
pub mod room;

pub use hub::{Hub, HubStats, Outbox};
pub use room::Room;
