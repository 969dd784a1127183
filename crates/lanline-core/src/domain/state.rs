//! The endpoint connection state machine.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!                 connect()            completion task
//!  Disconnected ───────────► Connecting ───────────────► Connected
//!       ▲                        │                           │
//!       │      dial/bind failed  │                           │ disconnect()
//!       ├────────────────────────┘                           ▼
//!       │              teardown task                   Disconnecting
//!       └────────────────────────────────────────────────────┘
//! ```
//!
//! The machine is cyclic: after teardown the endpoint can connect again.
//!
//! `connect()` and `disconnect()` claim their transition synchronously with a
//! compare-and-swap, so two racing callers can never both start a dial or both
//! queue a teardown.  The transitions *out* of the transient states happen on
//! the endpoint's command-queue worker (or, for a failed dial, on the
//! connection thread that owns the attempt).
//!
//! Only `Connected` counts as connected.  A send issued while the teardown is
//! queued therefore fails fast with `NotConnected` instead of queueing a write
//! against a socket that is about to close.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{ConnectionError, ErrorKind};

/// The four states of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Atomic cell holding an endpoint's [`ConnectionState`].
#[derive(Debug)]
pub struct LinkState {
    inner: AtomicU8,
}

impl LinkState {
    /// Creates a cell in the `Disconnected` state.
    pub fn new() -> Self {
        Self {
            inner: AtomicU8::new(ConnectionState::Disconnected as u8),
        }
    }

    /// The current state.
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// `true` only in `Connected`.
    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    /// Fails fast with `NotConnected` unless the endpoint is `Connected`.
    pub fn ensure_connected(&self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::not_connected())
        }
    }

    /// Claims `Disconnected -> Connecting` for a new connect attempt.
    ///
    /// # Errors
    ///
    /// `AlreadyConnected` when connected, `Busy` while another transition is
    /// in flight.
    pub fn begin_connect(&self) -> Result<(), ConnectionError> {
        self.transition(ConnectionState::Disconnected, ConnectionState::Connecting)
            .map_err(|current| match current {
                ConnectionState::Connected => {
                    ConnectionError::with_message(ErrorKind::AlreadyConnected, "already connected")
                }
                _ => ConnectionError::with_message(
                    ErrorKind::Busy,
                    format!("cannot connect while {current:?}"),
                ),
            })
    }

    /// Claims `Connected -> Disconnecting` for a teardown.
    ///
    /// # Errors
    ///
    /// `Busy` while a connect attempt is in flight, `NotConnected` otherwise.
    pub fn begin_disconnect(&self) -> Result<(), ConnectionError> {
        self.transition(ConnectionState::Connected, ConnectionState::Disconnecting)
            .map_err(|current| match current {
                ConnectionState::Connecting => ConnectionError::with_message(
                    ErrorKind::Busy,
                    "connection attempt in progress",
                ),
                _ => ConnectionError::not_connected(),
            })
    }

    /// Moves from `from` to `to` if the cell currently holds `from`.
    ///
    /// Returns the observed state on failure.
    pub fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionState> {
        self.inner
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ConnectionState::from_u8)
    }

    /// Unconditionally stores `state`.
    pub fn set(&self, state: ConnectionState) {
        self.inner.store(state as u8, Ordering::Release);
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
