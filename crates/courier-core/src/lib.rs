//! # courier-core
//!
//! Presence tracking and the relay engine for Courier.
//!
//! - **Presence** - which connection currently represents each user
//! - **Session** - per-connection lifecycle (`Unregistered → Registered → Closed`)
//! - **Gateway** - the outbound seam to the connection layer
//! - **Relay** - applies client events, fanning out messages and notifications
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│    Relay    │────▶│   Gateway   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Presence   │
//!                     └─────────────┘
//! ```

pub mod connection;
pub mod event;
pub mod gateway;
pub mod presence;
pub mod relay;

/// A user identity, assigned by the authentication layer.
pub type UserId = String;

/// A room identifier. Opaque to the relay; clients derive it.
pub type RoomId = String;

pub use connection::{ConnectionId, Session, SessionState};
pub use event::ClientEvent;
pub use gateway::Gateway;
pub use presence::PresenceRegistry;
pub use relay::{Outcome, Relay};
