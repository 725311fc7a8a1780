//! # courier-protocol
//!
//! Wire protocol definitions for the Courier presence and room relay.
//!
//! Every frame is an `{"event", "data"}` envelope. Clients send
//! [`ClientFrame`]s and receive [`ServerFrame`]s, encoded either as JSON text
//! or as length-prefixed MessagePack.
//!
//! ## Events
//!
//! | direction | event | payload |
//! |---|---|---|
//! | client → server | `register` | user id |
//! | client → server | `joinRoom` | room id |
//! | client → server | `sendNotification` | [`Notification`] |
//! | client → server | `chatMessage` | [`ChatMessage`] |
//! | server → client | `connected` | connection id, version, heartbeat |
//! | server → client | `notification` | [`Notification`] |
//! | server → client | `newMessage` | [`ChatMessage`] |
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, ClientFrame};
//!
//! let frame = ClientFrame::join_room("alice_bob");
//!
//! let text = codec::encode_json(&frame).unwrap();
//! let decoded: ClientFrame = codec::decode_json(&text).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, Encoding, FrameReader, ProtocolError};
pub use frames::{ChatMessage, ClientFrame, Notification, ServerFrame, CHAT_NOTIFICATION_TYPE};
pub use version::{Version, PROTOCOL_VERSION};
