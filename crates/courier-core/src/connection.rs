//! Connection identity and per-connection session state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::UserId;

/// Counter mixed into generated ids so two connections accepted within the
/// same nanosecond still get distinct ids.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a connection ID unique for the lifetime of the process.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a single connection as seen by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no `register` yet.
    Unregistered,
    /// At least one `register` has been processed.
    Registered,
    /// Disconnected. Terminal.
    Closed,
}

/// Relay-side state of one connection.
///
/// Owned by the task driving the connection, so events for a connection are
/// applied in the order they arrive.
#[derive(Debug, Clone)]
pub struct Session {
    id: ConnectionId,
    state: SessionState,
    user: Option<UserId>,
}

impl Session {
    /// Create a session for a freshly accepted connection.
    #[must_use]
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: SessionState::Unregistered,
            user: None,
        }
    }

    /// The connection this session belongs to.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The user most recently registered on this connection.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Record a registration. Re-entrant; ignored once closed.
    pub fn mark_registered(&mut self, user: impl Into<UserId>) {
        if !self.is_closed() {
            self.user = Some(user.into());
            self.state = SessionState::Registered;
        }
    }

    /// Move to the terminal state.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}
