//! The error value every lanline component reports failures with.
//!
//! Synchronous misuse (sending while disconnected, addressing an unknown
//! client) is returned to the caller as `Err(ConnectionError)`.  Failures
//! detected on a background thread (accept, read, teardown) are handed to the
//! application's `on_error` callback as the same type, so the two paths share
//! one taxonomy.

use std::fmt;
use std::io;

use thiserror::Error;

/// The kind of failure, from a fixed taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Generic or unknown error.
    Unknown,
    /// The endpoint is not connected.
    NotConnected,
    /// The endpoint (or its command queue) has not been started or was terminated.
    NotStarted,
    /// The endpoint is still running where a stopped one was required.
    AlreadyStarted,
    /// `connect` was called on a connected endpoint.
    AlreadyConnected,
    /// A transition is already in progress.
    Busy,
    /// Generic I/O failure.
    Io,
    /// Failure while reading from a socket, or bad input from the caller.
    Input,
    /// Failure while writing to a socket.
    Output,
    /// Failure while establishing a connection.
    Connection,
    /// The port is already bound by another socket.
    PortBusy,
    /// Nothing is listening on the requested port.
    PortNotFound,
    /// The host name could not be resolved or reached.
    HostNotFound,
    /// Closing a socket failed during teardown.
    UnableToDisconnect,
    /// An important request got no answer.
    NoResponse,
    /// A message violated the line protocol.
    Protocol,
    /// The network interfaces are unreachable.
    NetworkError,
    /// A deadline expired.  The core enforces none; kept for collaborators.
    Timeout,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 18] = [
        ErrorKind::Unknown,
        ErrorKind::NotConnected,
        ErrorKind::NotStarted,
        ErrorKind::AlreadyStarted,
        ErrorKind::AlreadyConnected,
        ErrorKind::Busy,
        ErrorKind::Io,
        ErrorKind::Input,
        ErrorKind::Output,
        ErrorKind::Connection,
        ErrorKind::PortBusy,
        ErrorKind::PortNotFound,
        ErrorKind::HostNotFound,
        ErrorKind::UnableToDisconnect,
        ErrorKind::NoResponse,
        ErrorKind::Protocol,
        ErrorKind::NetworkError,
        ErrorKind::Timeout,
    ];

    /// Short human-readable description used as the `Display` prefix.
    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::Unknown => "unknown error",
            ErrorKind::NotConnected => "not connected",
            ErrorKind::NotStarted => "not started",
            ErrorKind::AlreadyStarted => "already started",
            ErrorKind::AlreadyConnected => "already connected",
            ErrorKind::Busy => "busy",
            ErrorKind::Io => "I/O error",
            ErrorKind::Input => "input error",
            ErrorKind::Output => "output error",
            ErrorKind::Connection => "connection error",
            ErrorKind::PortBusy => "port busy",
            ErrorKind::PortNotFound => "port not found",
            ErrorKind::HostNotFound => "host not found",
            ErrorKind::UnableToDisconnect => "unable to disconnect",
            ErrorKind::NoResponse => "no response",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::NetworkError => "network error",
            ErrorKind::Timeout => "timeout",
        }
    }

    /// Classifies an I/O error raised by a socket operation.
    ///
    /// Returns `fallback` when the I/O error kind has no closer match in the
    /// taxonomy.
    pub fn from_io(err: &io::Error, fallback: ErrorKind) -> ErrorKind {
        match err.kind() {
            io::ErrorKind::AddrInUse => ErrorKind::PortBusy,
            io::ErrorKind::ConnectionRefused => ErrorKind::PortNotFound,
            io::ErrorKind::AddrNotAvailable => ErrorKind::HostNotFound,
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::NotConnected => ErrorKind::NotConnected,
            io::ErrorKind::InvalidData => ErrorKind::Protocol,
            _ => fallback,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A tagged failure: a kind, an optional detail message and an optional cause.
#[derive(Debug, Error)]
#[error("{kind}{}", .message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct ConnectionError {
    kind: ErrorKind,
    message: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ConnectionError {
    /// Creates an error carrying only a kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Creates an error with a detail message.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
            source: None,
        }
    }

    /// Creates an error with a detail message wrapping an underlying cause.
    pub fn with_source<E>(kind: ErrorKind, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            message: Some(message.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Wraps an I/O error from a dial or bind attempt, refining `fallback`
    /// with [`ErrorKind::from_io`].
    pub fn from_io(fallback: ErrorKind, message: impl Into<String>, err: io::Error) -> Self {
        let kind = ErrorKind::from_io(&err, fallback);
        Self::with_source(kind, message, err)
    }

    /// The error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The detail message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The fail-fast error returned by send operations on a disconnected endpoint.
    pub fn not_connected() -> Self {
        Self::new(ErrorKind::NotConnected)
    }
}

impl From<ErrorKind> for ConnectionError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
