//! ClientRegistry: the server's map from connection identity to writer.
//!
//! The registry is the only explicitly locked structure in the server.  Every
//! operation (insert, remove, lookup, size, enumeration) takes the same
//! mutex for its whole duration, and the underlying map is never handed out.
//!
//! # Open / closed
//!
//! The registry starts *closed*.  The connect-completion command opens it and
//! the teardown command closes it again with [`ClientRegistry::close_all`],
//! which drains every entry in the same critical section.  Inserting into a
//! closed registry is refused, so an accept that races a teardown can never
//! leave a stale entry behind.
//!
//! # Removal happens exactly once
//!
//! An entry is removed either by its reader's cleanup command or by the
//! server-wide teardown.  Whichever runs second finds nothing and gets `None`
//! back, which is how callers know not to fire `on_client_removed` twice.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lanline_core::ConnectionId;

/// One registered client: its write side and remote address.
#[derive(Debug)]
pub struct ClientEntry<W> {
    pub writer: W,
    pub addr: SocketAddr,
}

#[derive(Debug)]
struct RegistryInner<W> {
    open: bool,
    clients: HashMap<ConnectionId, ClientEntry<W>>,
}

/// Thread-safe registry of connected clients.
///
/// Generic over the writer so the locking rules can be exercised without
/// sockets; the server uses the default, `TcpStream`.
#[derive(Debug)]
pub struct ClientRegistry<W = TcpStream> {
    inner: Mutex<RegistryInner<W>>,
}

impl<W> ClientRegistry<W> {
    /// Creates an empty, closed registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                open: false,
                clients: HashMap::new(),
            }),
        }
    }

    // A panic inside a visitor must not wedge the server; the map itself is
    // never left half-updated by any operation here.
    fn lock(&self) -> MutexGuard<'_, RegistryInner<W>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allows insertions.
    pub fn open(&self) {
        self.lock().open = true;
    }

    /// `true` while insertions are allowed.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Registers a client.
    ///
    /// Hands the writer back as `Err` when the registry is closed or the
    /// identity is already present.
    pub fn insert(&self, id: ConnectionId, writer: W, addr: SocketAddr) -> Result<(), W> {
        let mut inner = self.lock();
        if !inner.open || inner.clients.contains_key(&id) {
            return Err(writer);
        }
        inner.clients.insert(id, ClientEntry { writer, addr });
        Ok(())
    }

    /// Removes a client, returning its entry if it was still present.
    pub fn remove(&self, id: ConnectionId) -> Option<ClientEntry<W>> {
        self.lock().clients.remove(&id)
    }

    /// `true` if `id` is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().clients.contains_key(&id)
    }

    /// Remote address of a registered client.
    pub fn addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.lock().clients.get(&id).map(|e| e.addr)
    }

    /// Runs `f` on one client's writer while holding the lock.
    ///
    /// Returns `None` if the client is not registered.
    pub fn with_writer<R>(&self, id: ConnectionId, f: impl FnOnce(&mut W) -> R) -> Option<R> {
        self.lock().clients.get_mut(&id).map(|e| f(&mut e.writer))
    }

    /// Visits every client while holding the lock for the whole enumeration,
    /// so no removal can be observed mid-way.
    pub fn for_each(&self, mut f: impl FnMut(ConnectionId, &mut ClientEntry<W>)) {
        let mut inner = self.lock();
        for (id, entry) in inner.clients.iter_mut() {
            f(*id, entry);
        }
    }

    /// Number of registered clients.
    pub fn size(&self) -> usize {
        self.lock().clients.len()
    }

    /// Snapshot of the registered identities.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.lock().clients.keys().copied().collect()
    }

    /// Closes the registry and drains every entry in one critical section.
    pub fn close_all(&self) -> Vec<(ConnectionId, ClientEntry<W>)> {
        let mut inner = self.lock();
        inner.open = false;
        inner.clients.drain().collect()
    }
}

impl<W> Default for ClientRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
