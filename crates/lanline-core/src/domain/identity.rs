//! Opaque identity tokens for open sockets.
//!
//! The registry and every callback name a peer by its [`ConnectionId`], never
//! by a socket handle.  A fresh id is minted for each accepted or dialled
//! socket, so an id is never reused even if the OS recycles the descriptor.

use std::fmt;

use uuid::Uuid;

/// Uniquely identifies one TCP socket for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Mints a new random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable; the full UUID is in Debug.
        let mut buf = Uuid::encode_buffer();
        let full = self.0.simple().encode_lower(&mut buf);
        f.write_str(&full[..8])
    }
}
