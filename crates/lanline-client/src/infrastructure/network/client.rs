//! Client endpoint: one TCP connection to a lanline server.
//!
//! ```text
//! connect(host, port)
//!   └─ lanline-client-connect   resolves + dials, posts the completion command
//! completion command (worker)   stores the writer, Connected, on_connected
//!   └─ lanline-reader-*         reads lines until the stream ends
//! reader finalizer              posts the peer-lost command
//! ```
//!
//! The socket writer lives in the command queue's session, so only queued
//! commands can write to it or close it.  A send is checked synchronously
//! (`NotConnected`) and then queued behind any pending teardown.
//!
//! Each established connection gets a fresh [`ConnectionId`].  The peer-lost
//! command only acts on the connection it was raised for, so a stale reader
//! finishing after a reconnect cannot tear down the new connection.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use lanline_core::{
    encode_payload, CommandQueue, ConnectionError, ConnectionId, ConnectionState, ErrorKind,
    LinkState, Payload, ReadOutcome, ReaderLoop,
};
use tracing::{debug, error, info, warn};

use super::handler::ClientHandler;

/// State owned by the command-queue worker.
#[derive(Default)]
struct ClientSession {
    writer: Option<TcpStream>,
    current: Option<ConnectionId>,
}

impl ClientSession {
    fn close(&mut self) -> io::Result<()> {
        self.current = None;
        match self.writer.take() {
            Some(writer) => match writer.shutdown(Shutdown::Both) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }
}

struct ClientShared {
    handler: Arc<dyn ClientHandler>,
    state: LinkState,
    address: Mutex<Option<String>>,
    port: AtomicU16,
    queue: CommandQueue<ClientSession>,
}

/// A line-oriented TCP client.  Clones share the same connection.
#[derive(Clone)]
pub struct Client {
    shared: Arc<ClientShared>,
}

impl Client {
    /// Creates a disconnected client.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotStarted`] if the command-queue thread cannot be spawned.
    pub fn new(handler: impl ClientHandler) -> Result<Self, ConnectionError> {
        let queue = CommandQueue::spawn("lanline-client-queue", ClientSession::default())
            .map_err(|e| {
                ConnectionError::with_source(ErrorKind::NotStarted, "cannot start command queue", e)
            })?;
        Ok(Self {
            shared: Arc::new(ClientShared {
                handler: Arc::new(handler),
                state: LinkState::new(),
                address: Mutex::new(None),
                port: AtomicU16::new(0),
                queue,
            }),
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Dials `host:port` on a background thread.
    ///
    /// Success is reported by `on_connected`; a resolution or dial failure by
    /// `on_error`, leaving the client `Disconnected`.
    ///
    /// # Errors
    ///
    /// `AlreadyConnected` if connected, `Busy` while a connect or disconnect
    /// is in flight.
    pub fn connect(&self, host: impl Into<String>, port: u16) -> Result<(), ConnectionError> {
        self.shared.state.begin_connect()?;
        let host = host.into();
        *self.address_slot() = Some(host.clone());
        self.shared.port.store(port, Ordering::Release);

        let client = self.clone();
        let spawned = thread::Builder::new()
            .name("lanline-client-connect".to_string())
            .spawn(move || client.dial(&host, port));
        if let Err(e) = spawned {
            self.shared.state.set(ConnectionState::Disconnected);
            return Err(ConnectionError::with_source(
                ErrorKind::Connection,
                "cannot spawn the connection thread",
                e,
            ));
        }
        Ok(())
    }

    /// Closes the connection.  `on_disconnected` fires once it is closed.
    ///
    /// # Errors
    ///
    /// `NotConnected` if not connected, `Busy` while a connect is in flight.
    pub fn disconnect(&self) -> Result<(), ConnectionError> {
        self.shared.state.begin_disconnect()?;
        let client = self.clone();
        if let Err(e) = self
            .shared
            .queue
            .submit(move |session| client.teardown(session))
        {
            self.shared.state.set(ConnectionState::Connected);
            return Err(e);
        }
        Ok(())
    }

    /// Alias for [`disconnect`](Self::disconnect).
    pub fn close(&self) -> Result<(), ConnectionError> {
        self.disconnect()
    }

    /// Stops the command queue for good.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` unless `Disconnected`; `NotStarted` if already
    /// terminated.
    pub fn terminate(&self) -> Result<(), ConnectionError> {
        if self.shared.state.get() != ConnectionState::Disconnected {
            return Err(ConnectionError::with_message(
                ErrorKind::AlreadyStarted,
                "disconnect before terminating",
            ));
        }
        self.shared.queue.terminate()
    }

    /// Blocks until every command queued before this call has run.
    ///
    /// Must not be called from a handler callback.
    pub fn flush(&self) -> Result<(), ConnectionError> {
        self.shared.queue.flush()
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// The host passed to the last `connect`.
    pub fn address(&self) -> Option<String> {
        self.address_slot().clone()
    }

    /// The port passed to the last `connect`.
    pub fn port(&self) -> u16 {
        self.shared.port.load(Ordering::Acquire)
    }

    // ── Sends ─────────────────────────────────────────────────────────────────

    /// Sends `msg` without a line terminator.
    pub fn print(&self, msg: impl Into<Payload>) -> Result<(), ConnectionError> {
        self.send(msg.into(), false)
    }

    /// Sends `msg` as one line.
    ///
    /// # Errors
    ///
    /// `NotConnected` when not connected; `Protocol` if the text contains a
    /// line break.
    pub fn println(&self, msg: impl Into<Payload>) -> Result<(), ConnectionError> {
        self.send(msg.into(), true)
    }

    fn send(&self, payload: Payload, newline: bool) -> Result<(), ConnectionError> {
        self.shared.state.ensure_connected()?;
        let bytes = encode_payload(&payload, newline)?;
        let client = self.clone();
        self.shared.queue.submit(move |session| {
            let Some(writer) = session.writer.as_mut() else {
                debug!("connection gone before the write ran; dropped");
                return;
            };
            if let Err(e) = writer.write_all(&bytes) {
                warn!("write failed: {e}");
                client.report(ConnectionError::with_source(
                    ErrorKind::Output,
                    "write to server failed",
                    e,
                ));
            }
        })
    }

    // ── Connection thread ─────────────────────────────────────────────────────

    fn dial(self, host: &str, port: u16) {
        let addrs: Vec<SocketAddr> = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                self.fail_connect(ConnectionError::with_source(
                    ErrorKind::HostNotFound,
                    format!("cannot resolve {host}"),
                    e,
                ));
                return;
            }
        };
        if addrs.is_empty() {
            self.fail_connect(ConnectionError::with_message(
                ErrorKind::HostNotFound,
                format!("no address for {host}"),
            ));
            return;
        }

        let stream = TcpStream::connect(&addrs[..]).and_then(|s| {
            let reader = s.try_clone()?;
            Ok((s, reader))
        });
        let (writer, reader) = match stream {
            Ok(pair) => pair,
            Err(e) => {
                self.fail_connect(ConnectionError::from_io(
                    ErrorKind::Connection,
                    format!("cannot connect to {host}:{port}"),
                    e,
                ));
                return;
            }
        };

        let client = self.clone();
        if let Err(e) = self
            .shared
            .queue
            .submit(move |session| client.complete_connect(session, writer, reader))
        {
            self.fail_connect(e);
        }
    }

    fn fail_connect(&self, error: ConnectionError) {
        error!("connect failed: {error}");
        self.shared.state.set(ConnectionState::Disconnected);
        self.report(error);
    }

    // ── Worker-side commands ──────────────────────────────────────────────────

    fn complete_connect(&self, session: &mut ClientSession, writer: TcpStream, reader: TcpStream) {
        let id = ConnectionId::new();
        if let Err(observed) = self
            .shared
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            error!(?observed, "unexpected state at connect completion");
            let _ = writer.shutdown(Shutdown::Both);
            self.report(ConnectionError::with_message(
                ErrorKind::Connection,
                format!("connection abandoned: client became {observed:?} while dialing"),
            ));
            return;
        }
        session.writer = Some(writer);
        session.current = Some(id);
        info!(connection = %id, address = ?self.address(), port = self.port(), "connected");
        self.shared.handler.on_connected(self);

        let on_line = {
            let client = self.clone();
            move |from: ConnectionId, line: String| client.shared.handler.on_message(&client, from, line)
        };
        let finalizer = {
            let client = self.clone();
            move |from: ConnectionId, outcome: ReadOutcome| client.reader_finished(from, outcome)
        };
        if let Err(e) = ReaderLoop::new(id).spawn(reader, on_line, finalizer) {
            error!("cannot spawn reader: {e}");
            self.report(ConnectionError::with_source(
                ErrorKind::Input,
                "cannot start reading from the server",
                e,
            ));
            self.shared.state.set(ConnectionState::Disconnecting);
            self.teardown(session);
        }
    }

    fn teardown(&self, session: &mut ClientSession) {
        if let Err(e) = session.close() {
            warn!("failed to close socket: {e}");
            self.report(ConnectionError::with_source(
                ErrorKind::UnableToDisconnect,
                "cannot close the connection",
                e,
            ));
        }
        if let Err(observed) = self
            .shared
            .state
            .transition(ConnectionState::Disconnecting, ConnectionState::Disconnected)
        {
            debug!(?observed, "teardown found no disconnect in progress");
            return;
        }
        info!("disconnected");
        self.shared.handler.on_disconnected(self);
    }

    fn reader_finished(&self, connection: ConnectionId, outcome: ReadOutcome) {
        let client = self.clone();
        if let Err(e) = self
            .shared
            .queue
            .submit(move |session| client.peer_lost(session, connection, outcome))
        {
            debug!(%connection, "cleanup not queued: {e}");
        }
    }

    fn peer_lost(&self, session: &mut ClientSession, connection: ConnectionId, outcome: ReadOutcome) {
        if session.current != Some(connection) {
            debug!(%connection, "reader of a closed connection finished");
            return;
        }
        if let Err(e) = session.close() {
            debug!(%connection, "shutdown after stream end: {e}");
        }
        // Err(Disconnecting): the queued teardown completes the transition and
        // fires on_disconnected.
        let lost = self
            .shared
            .state
            .transition(ConnectionState::Connected, ConnectionState::Disconnected);
        info!(%connection, %outcome, "connection lost");

        self.report(match outcome {
            ReadOutcome::Closed => {
                ConnectionError::with_message(ErrorKind::Connection, "connection closed by peer")
            }
            ReadOutcome::Failed(e) => {
                ConnectionError::from_io(ErrorKind::Input, "reading from the server failed", e)
            }
            ReadOutcome::Aborted => {
                ConnectionError::with_message(ErrorKind::Unknown, "message handler panicked")
            }
        });
        match lost {
            Ok(()) => self.shared.handler.on_disconnected(self),
            Err(observed) => debug!(%connection, ?observed, "disconnect already in progress"),
        }
    }

    fn report(&self, error: ConnectionError) {
        self.shared.handler.on_error(self, error);
    }

    fn address_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.shared
            .address
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
