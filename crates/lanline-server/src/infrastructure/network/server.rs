//! Server endpoint: bind, accept loop, broadcast/unicast sends, teardown.
//!
//! # Threads
//!
//! ```text
//! connect(port)
//!   └─ lanline-server-bind      binds, then posts the completion command
//! completion command (worker)   opens registry, Connected, on_connected,
//!   └─ lanline-server-accept    spawns the accept loop
//!        └─ lanline-reader-*    one per admitted client
//! ```
//!
//! Every send is checked synchronously (`NotConnected`, unknown client) and
//! then posted to the command queue, which performs the actual write.  The
//! teardown command runs on the same queue, so a send queued before
//! `disconnect()` completes against a live socket and a send attempted after
//! it fails fast.
//!
//! # Stopping the accept loop
//!
//! The accept loop blocks in `accept` and checks a stop flag each time it
//! returns.  The teardown command raises the flag, then connects to the
//! listener itself so the blocked `accept` returns, and joins the loop.  When
//! `on_disconnected` fires the listening socket has been closed and the port
//! can be bound again.

use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lanline_core::{
    encode_payload, CommandQueue, ConnectionError, ConnectionId, ConnectionState, ErrorKind,
    LinkState, Payload, ReadOutcome, ReaderLoop,
};
use tracing::{debug, error, info, warn};

use super::handler::ServerHandler;
use crate::domain::registry::ClientRegistry;

/// Tunables for a [`Server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Interface the listening socket binds to.
    pub bind_address: IpAddr,
    /// Pause after a failed `accept` before trying again.
    pub accept_backoff: Duration,
    /// Connections beyond this many are closed on arrival.  `0` = unlimited.
    pub max_clients: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            accept_backoff: Duration::from_millis(50),
            max_clients: 0,
        }
    }
}

/// State owned by the command-queue worker.
#[derive(Default)]
struct ServerSession {
    acceptor: Option<Acceptor>,
}

struct Acceptor {
    stop: Arc<AtomicBool>,
    /// Where to connect to unblock the loop's `accept`.
    wake: SocketAddr,
    handle: JoinHandle<()>,
}

/// Timeout for the self-connect that stops the accept loop.
const WAKE_TIMEOUT: Duration = Duration::from_secs(2);

impl Acceptor {
    /// Stops the accept loop and waits for it.  Returns `false` if the loop
    /// could not be woken or panicked.
    fn stop(self) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        match TcpStream::connect_timeout(&self.wake, WAKE_TIMEOUT) {
            Ok(stream) => drop(stream),
            Err(e) => {
                // The loop stays blocked in accept; leave the thread behind.
                warn!(wake = %self.wake, "cannot wake the accept loop: {e}");
                return false;
            }
        }
        self.handle.join().is_ok()
    }
}

/// The address a local connect reaches `listener` on.
fn wake_address(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

struct ServerShared {
    handler: Arc<dyn ServerHandler>,
    options: ServerOptions,
    state: LinkState,
    port: AtomicU16,
    registry: ClientRegistry,
    queue: CommandQueue<ServerSession>,
}

/// A line-oriented TCP server accepting many concurrent clients.
///
/// `Server` is a cheap handle: clones share the same endpoint.
#[derive(Clone)]
pub struct Server {
    shared: Arc<ServerShared>,
}

impl Server {
    /// Creates a disconnected server with default options.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotStarted`] if the command-queue thread cannot be spawned.
    pub fn new(handler: impl ServerHandler) -> Result<Self, ConnectionError> {
        Self::with_options(handler, ServerOptions::default())
    }

    /// Creates a disconnected server.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotStarted`] if the command-queue thread cannot be spawned.
    pub fn with_options(
        handler: impl ServerHandler,
        options: ServerOptions,
    ) -> Result<Self, ConnectionError> {
        let queue = CommandQueue::spawn("lanline-server-queue", ServerSession::default())
            .map_err(|e| {
                ConnectionError::with_source(ErrorKind::NotStarted, "cannot start command queue", e)
            })?;
        Ok(Self {
            shared: Arc::new(ServerShared {
                handler: Arc::new(handler),
                options,
                state: LinkState::new(),
                port: AtomicU16::new(0),
                registry: ClientRegistry::new(),
                queue,
            }),
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Starts listening on `port` (`0` picks a free port).
    ///
    /// Returns as soon as the bind thread is running; success is reported by
    /// `on_connected`, failure by `on_error` with the server left
    /// `Disconnected`.
    ///
    /// # Errors
    ///
    /// `AlreadyConnected` if listening, `Busy` while a connect or disconnect
    /// is in flight.
    pub fn connect(&self, port: u16) -> Result<(), ConnectionError> {
        self.shared.state.begin_connect()?;
        self.shared.port.store(port, Ordering::Release);

        let server = self.clone();
        let spawned = thread::Builder::new()
            .name("lanline-server-bind".to_string())
            .spawn(move || server.bind(port));
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

    /// Closes every client socket and the listening socket.
    ///
    /// Returns immediately; `on_disconnected` fires when teardown completes.
    ///
    /// # Errors
    ///
    /// `NotConnected` if not listening, `Busy` while a connect is in flight.
    pub fn disconnect(&self) -> Result<(), ConnectionError> {
        self.shared.state.begin_disconnect()?;
        let server = self.clone();
        let queued = self
            .shared
            .queue
            .submit(move |session| server.teardown(session));
        if let Err(e) = queued {
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
    /// `AlreadyStarted` unless the server is fully `Disconnected`;
    /// `NotStarted` if already terminated.
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

    /// The requested port, or the bound port once listening.
    pub fn port(&self) -> u16 {
        self.shared.port.load(Ordering::Acquire)
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry.size()
    }

    /// Snapshot of the connected clients.
    pub fn clients(&self) -> Vec<ConnectionId> {
        self.shared.registry.ids()
    }

    pub fn is_client(&self, client: ConnectionId) -> bool {
        self.shared.registry.contains(client)
    }

    pub fn client_addr(&self, client: ConnectionId) -> Option<SocketAddr> {
        self.shared.registry.addr(client)
    }

    // ── Sends ─────────────────────────────────────────────────────────────────

    /// Sends `msg` to every client without a line terminator.
    pub fn print(&self, msg: impl Into<Payload>) -> Result<(), ConnectionError> {
        self.broadcast(msg.into(), false)
    }

    /// Sends `msg` to every client as one line.
    pub fn println(&self, msg: impl Into<Payload>) -> Result<(), ConnectionError> {
        self.broadcast(msg.into(), true)
    }

    /// Sends `msg` to one client without a line terminator.
    ///
    /// # Errors
    ///
    /// `NotConnected` when not listening; `Input` when `client` is not
    /// registered.
    pub fn print_to(&self, client: ConnectionId, msg: impl Into<Payload>) -> Result<(), ConnectionError> {
        self.unicast(client, msg.into(), false)
    }

    /// Sends `msg` to one client as one line.
    ///
    /// # Errors
    ///
    /// `NotConnected` when not listening; `Input` when `client` is not
    /// registered; `Protocol` if the text contains a line break.
    pub fn println_to(&self, client: ConnectionId, msg: impl Into<Payload>) -> Result<(), ConnectionError> {
        self.unicast(client, msg.into(), true)
    }

    fn broadcast(&self, payload: Payload, newline: bool) -> Result<(), ConnectionError> {
        self.shared.state.ensure_connected()?;
        let bytes = encode_payload(&payload, newline)?;
        let server = self.clone();
        self.shared.queue.submit(move |_| server.write_to_all(&bytes))
    }

    fn unicast(&self, client: ConnectionId, payload: Payload, newline: bool) -> Result<(), ConnectionError> {
        self.shared.state.ensure_connected()?;
        if !self.shared.registry.contains(client) {
            return Err(ConnectionError::with_message(
                ErrorKind::Input,
                format!("{client} is not a client"),
            ));
        }
        let bytes = encode_payload(&payload, newline)?;
        let server = self.clone();
        self.shared
            .queue
            .submit(move |_| server.write_to_one(client, &bytes))
    }

    // ── Worker-side commands ──────────────────────────────────────────────────

    fn write_to_all(&self, bytes: &[u8]) {
        let mut failed = Vec::new();
        self.shared.registry.for_each(|id, entry| {
            if let Err(e) = entry.writer.write_all(bytes) {
                failed.push((id, e));
            }
        });
        // Report outside the registry lock so handlers may query the server.
        for (id, e) in failed {
            warn!(client = %id, "broadcast write failed: {e}");
            self.report(ConnectionError::with_source(
                ErrorKind::Output,
                format!("write to client {id} failed"),
                e,
            ));
        }
    }

    fn write_to_one(&self, client: ConnectionId, bytes: &[u8]) {
        match self.shared.registry.with_writer(client, |w| w.write_all(bytes)) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(client = %client, "write failed: {e}");
                self.report(ConnectionError::with_source(
                    ErrorKind::Output,
                    format!("write to client {client} failed"),
                    e,
                ));
            }
            None => debug!(client = %client, "client left before the write ran; dropped"),
        }
    }

    fn complete_connect(&self, session: &mut ServerSession, listener: TcpListener) {
        self.shared.registry.open();
        if let Err(observed) = self
            .shared
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            // Only this command moves the state out of Connecting.
            error!(?observed, "unexpected state at connect completion");
            self.shared.registry.close_all();
            return;
        }
        info!(port = self.port(), "server listening");
        self.shared.handler.on_connected(self);

        let wake = match listener.local_addr() {
            Ok(local) => wake_address(local),
            Err(e) => {
                error!("listener has no local address: {e}");
                self.report(ConnectionError::with_source(
                    ErrorKind::Connection,
                    "cannot start the accept loop",
                    e,
                ));
                self.shared.state.set(ConnectionState::Disconnecting);
                self.teardown(session);
                return;
            }
        };
        let stop = Arc::new(AtomicBool::new(false));
        let server = self.clone();
        let flag = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name("lanline-server-accept".to_string())
            .spawn(move || server.accept_loop(listener, flag));
        match spawned {
            Ok(handle) => session.acceptor = Some(Acceptor { stop, wake, handle }),
            Err(e) => {
                error!("cannot spawn accept loop: {e}");
                self.report(ConnectionError::with_source(
                    ErrorKind::Connection,
                    "cannot start the accept loop",
                    e,
                ));
                self.shared.state.set(ConnectionState::Disconnecting);
                self.teardown(session);
            }
        }
    }

    fn teardown(&self, session: &mut ServerSession) {
        info!(clients = self.client_count(), "server tearing down");

        // Every socket is attempted even if some fail to close.
        for (id, entry) in self.shared.registry.close_all() {
            if let Err(e) = entry.writer.shutdown(Shutdown::Both) {
                if e.kind() != io::ErrorKind::NotConnected {
                    warn!(client = %id, "failed to close client socket: {e}");
                    self.report(ConnectionError::with_source(
                        ErrorKind::UnableToDisconnect,
                        format!("cannot close client {id}"),
                        e,
                    ));
                }
            }
        }

        if let Some(acceptor) = session.acceptor.take() {
            if !acceptor.stop() {
                self.report(ConnectionError::with_message(
                    ErrorKind::UnableToDisconnect,
                    "cannot stop the accept loop",
                ));
            }
        }

        self.shared.state.set(ConnectionState::Disconnected);
        info!("server disconnected");
        self.shared.handler.on_disconnected(self);
    }

    fn remove_client(&self, client: ConnectionId, outcome: ReadOutcome) {
        let Some(entry) = self.shared.registry.remove(client) else {
            debug!(client = %client, "already removed by teardown");
            return;
        };
        if let Err(e) = entry.writer.shutdown(Shutdown::Both) {
            debug!(client = %client, "shutdown after stream end: {e}");
        }
        drop(entry);
        info!(client = %client, %outcome, "client removed");

        match outcome {
            ReadOutcome::Closed => {}
            ReadOutcome::Failed(e) => self.report(ConnectionError::from_io(
                ErrorKind::Input,
                format!("reading from client {client} failed"),
                e,
            )),
            ReadOutcome::Aborted => self.report(ConnectionError::with_message(
                ErrorKind::Unknown,
                format!("message handler panicked for client {client}"),
            )),
        }
        self.shared.handler.on_client_removed(self, client);
    }

    // ── Connection thread / accept loop ───────────────────────────────────────

    fn bind(self, port: u16) {
        let addr = SocketAddr::new(self.shared.options.bind_address, port);
        let listener = match TcpListener::bind(addr) {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, "cannot start the server: {e}");
                self.shared.state.set(ConnectionState::Disconnected);
                self.report(ConnectionError::from_io(
                    ErrorKind::Connection,
                    format!("cannot start the server on {addr}"),
                    e,
                ));
                return;
            }
        };

        if let Ok(local) = listener.local_addr() {
            self.shared.port.store(local.port(), Ordering::Release);
        }
        let server = self.clone();
        if let Err(e) = self
            .shared
            .queue
            .submit(move |session| server.complete_connect(session, listener))
        {
            self.shared.state.set(ConnectionState::Disconnected);
            self.report(e);
        }
    }

    fn accept_loop(self, listener: TcpListener, stop: Arc<AtomicBool>) {
        let backoff = self.shared.options.accept_backoff;
        debug!("accept loop started");
        loop {
            let accepted = listener.accept();
            // Whatever woke us after the flag went up is not admitted.
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match accepted {
                Ok((stream, addr)) => self.admit(stream, addr),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("accept failed: {e}");
                    self.report(ConnectionError::with_source(
                        ErrorKind::Connection,
                        "accept failed",
                        e,
                    ));
                    thread::sleep(backoff);
                }
            }
        }
        debug!("accept loop stopped");
    }

    fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        if !self.gatekeep(addr) {
            debug!(%addr, "client rejected");
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
        let limit = self.shared.options.max_clients;
        if limit != 0 && self.client_count() >= limit {
            info!(%addr, limit, "client limit reached; rejecting");
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }

        let reader = match stream.try_clone() {
            Ok(r) => r,
            Err(e) => {
                self.report(ConnectionError::with_source(
                    ErrorKind::Io,
                    format!("cannot split socket from {addr}"),
                    e,
                ));
                return;
            }
        };

        let id = ConnectionId::new();
        if let Err(writer) = self.shared.registry.insert(id, stream, addr) {
            debug!(%addr, "server closing; dropping new client");
            let _ = writer.shutdown(Shutdown::Both);
            return;
        }
        info!(client = %id, %addr, "client connected");
        self.shared.handler.on_new_client(self, id);

        let on_line = {
            let server = self.clone();
            move |from: ConnectionId, line: String| server.shared.handler.on_message(&server, from, line)
        };
        let finalizer = {
            let server = self.clone();
            move |from: ConnectionId, outcome: ReadOutcome| server.reader_finished(from, outcome)
        };
        if let Err(e) = ReaderLoop::new(id).spawn(reader, on_line, finalizer) {
            error!(client = %id, "cannot spawn reader: {e}");
            self.report(ConnectionError::with_source(
                ErrorKind::Input,
                format!("cannot start reading from client {id}"),
                e,
            ));
            self.reader_finished(id, ReadOutcome::Closed);
        }
    }

    /// Asks the application whether to admit `addr`.  A panicking gatekeeper
    /// counts as a rejection.
    fn gatekeep(&self, addr: SocketAddr) -> bool {
        let handler = &self.shared.handler;
        match panic::catch_unwind(AssertUnwindSafe(|| handler.accept_client(self, addr))) {
            Ok(accepted) => accepted,
            Err(_) => {
                warn!(%addr, "accept_client panicked; rejecting");
                self.report(ConnectionError::with_message(
                    ErrorKind::Unknown,
                    format!("accept_client panicked for {addr}; connection rejected"),
                ));
                false
            }
        }
    }

    /// Reader finalizer: the removal always goes through the queue.
    fn reader_finished(&self, client: ConnectionId, outcome: ReadOutcome) {
        let server = self.clone();
        if let Err(e) = self
            .shared
            .queue
            .submit(move |_| server.remove_client(client, outcome))
        {
            debug!(client = %client, "cleanup not queued: {e}");
        }
    }

    fn report(&self, error: ConnectionError) {
        self.shared.handler.on_error(self, error);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
