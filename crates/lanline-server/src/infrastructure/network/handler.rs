//! The server's collaborator interface and its channel adapter.
//!
//! The server never decides what a message means.  It calls back into an
//! application-supplied [`ServerHandler`] for every lifecycle event:
//!
//! | Callback            | Thread                | When                                  |
//! |---------------------|-----------------------|---------------------------------------|
//! | `on_connected`      | command queue worker  | the listening socket is bound          |
//! | `accept_client`     | accept loop           | before a new socket is registered      |
//! | `on_new_client`     | accept loop           | after the socket is registered         |
//! | `on_message`        | the client's reader   | once per inbound line                  |
//! | `on_client_removed` | command queue worker  | the client's reader saw the stream end |
//! | `on_error`          | whichever detected it | any recoverable failure                |
//! | `on_disconnected`   | command queue worker  | teardown finished                      |
//!
//! Callbacks run on several threads at once, so implementations must be
//! `Send + Sync`.  They may call back into the [`Server`] (for example to
//! reply from `on_message`); every send is queued, never run inline.  They
//! must not call [`Server::flush`], which waits on the worker that may be
//! waiting on them.

use std::net::SocketAddr;
use std::sync::Arc;

use lanline_core::{ConnectionError, ConnectionId};
use tokio::sync::mpsc;
use tracing::warn;

use super::server::Server;

/// Application callbacks invoked by a [`Server`].
#[cfg_attr(test, mockall::automock)]
pub trait ServerHandler: Send + Sync + 'static {
    /// The server is listening.
    fn on_connected(&self, _server: &Server) {}

    /// A recoverable failure; the server keeps running.
    fn on_error(&self, _server: &Server, error: ConnectionError) {
        warn!("server error: {error}");
    }

    /// One inbound line from `from`, without its terminator.
    fn on_message(&self, server: &Server, from: ConnectionId, line: String);

    /// Gatekeeper consulted before a new socket is registered.  Returning
    /// `false` closes the socket with no further callbacks.
    fn accept_client(&self, _server: &Server, _address: SocketAddr) -> bool {
        true
    }

    /// A client was registered and its reader started.
    fn on_new_client(&self, _server: &Server, _client: ConnectionId) {}

    /// A client's stream ended and it left the registry.
    fn on_client_removed(&self, _server: &Server, _client: ConnectionId) {}

    /// The server finished tearing down and is `Disconnected` again.
    fn on_disconnected(&self, _server: &Server) {}
}

/// Lets the application keep its own handle on a handler it gives away.
impl<T: ServerHandler> ServerHandler for Arc<T> {
    fn on_connected(&self, server: &Server) {
        (**self).on_connected(server)
    }

    fn on_error(&self, server: &Server, error: ConnectionError) {
        (**self).on_error(server, error)
    }

    fn on_message(&self, server: &Server, from: ConnectionId, line: String) {
        (**self).on_message(server, from, line)
    }

    fn accept_client(&self, server: &Server, address: SocketAddr) -> bool {
        (**self).accept_client(server, address)
    }

    fn on_new_client(&self, server: &Server, client: ConnectionId) {
        (**self).on_new_client(server, client)
    }

    fn on_client_removed(&self, server: &Server, client: ConnectionId) {
        (**self).on_client_removed(server, client)
    }

    fn on_disconnected(&self, server: &Server) {
        (**self).on_disconnected(server)
    }
}

/// A server lifecycle event, as forwarded by [`ChannelServerHandler`].
#[derive(Debug)]
pub enum ServerEvent {
    Connected { port: u16 },
    Error(ConnectionError),
    Message { from: ConnectionId, line: String },
    Rejected { address: SocketAddr },
    NewClient { client: ConnectionId, address: Option<SocketAddr> },
    ClientRemoved { client: ConnectionId },
    Disconnected,
}

type AcceptFilter = Box<dyn Fn(SocketAddr) -> bool + Send + Sync>;

/// A [`ServerHandler`] that turns every callback into a [`ServerEvent`] on
/// an unbounded tokio channel.
///
/// Lets an async application (or a test) consume server events with
/// `rx.recv().await` instead of implementing the trait.  Sends never block, so
/// the callback threads are never held up by a slow consumer.
pub struct ChannelServerHandler {
    tx: mpsc::UnboundedSender<ServerEvent>,
    filter: Option<AcceptFilter>,
}

impl ChannelServerHandler {
    /// Creates the handler together with the event receiver.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, filter: None }, rx)
    }

    /// Installs a gatekeeper predicate; rejected addresses produce
    /// [`ServerEvent::Rejected`].
    pub fn with_filter(mut self, filter: impl Fn(SocketAddr) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    fn emit(&self, event: ServerEvent) {
        // The receiver being gone just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl ServerHandler for ChannelServerHandler {
    fn on_connected(&self, server: &Server) {
        self.emit(ServerEvent::Connected { port: server.port() });
    }

    fn on_error(&self, _server: &Server, error: ConnectionError) {
        self.emit(ServerEvent::Error(error));
    }

    fn on_message(&self, _server: &Server, from: ConnectionId, line: String) {
        self.emit(ServerEvent::Message { from, line });
    }

    fn accept_client(&self, _server: &Server, address: SocketAddr) -> bool {
        let accepted = self.filter.as_ref().map_or(true, |f| f(address));
        if !accepted {
            self.emit(ServerEvent::Rejected { address });
        }
        accepted
    }

    fn on_new_client(&self, server: &Server, client: ConnectionId) {
        self.emit(ServerEvent::NewClient {
            client,
            address: server.client_addr(client),
        });
    }

    fn on_client_removed(&self, _server: &Server, client: ConnectionId) {
        self.emit(ServerEvent::ClientRemoved { client });
    }

    fn on_disconnected(&self, _server: &Server) {
        self.emit(ServerEvent::Disconnected);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
