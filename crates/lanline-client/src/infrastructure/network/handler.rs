//! The client's collaborator interface and its channel adapter.
//!
//! `on_message` runs on the connection's reader thread; every other callback
//! runs on the client's command-queue worker (or, for a failed dial, on the
//! connection thread).  Implementations must be `Send + Sync` and must not
//! call [`Client::flush`] from a callback.

use std::sync::Arc;

use lanline_core::{ConnectionError, ConnectionId};
use tokio::sync::mpsc;
use tracing::warn;

use super::client::Client;

/// Application callbacks invoked by a [`Client`].
#[cfg_attr(test, mockall::automock)]
pub trait ClientHandler: Send + Sync + 'static {
    /// The connection is established and reads have started.
    fn on_connected(&self, _client: &Client) {}

    /// A failure: a dial that did not succeed, a lost peer, a failed write.
    fn on_error(&self, _client: &Client, error: ConnectionError) {
        warn!("client error: {error}");
    }

    /// One line from the server, without its terminator.  `from` identifies
    /// the connection it arrived on; every reconnect gets a fresh id.
    fn on_message(&self, client: &Client, from: ConnectionId, line: String);

    /// The client is `Disconnected` again, after `disconnect()` or peer loss.
    fn on_disconnected(&self, _client: &Client) {}
}

impl<T: ClientHandler> ClientHandler for Arc<T> {
    fn on_connected(&self, client: &Client) {
        (**self).on_connected(client)
    }

    fn on_error(&self, client: &Client, error: ConnectionError) {
        (**self).on_error(client, error)
    }

    fn on_message(&self, client: &Client, from: ConnectionId, line: String) {
        (**self).on_message(client, from, line)
    }

    fn on_disconnected(&self, client: &Client) {
        (**self).on_disconnected(client)
    }
}

/// A client lifecycle event, as forwarded by [`ChannelClientHandler`].
#[derive(Debug)]
pub enum ClientEvent {
    Connected { address: Option<String>, port: u16 },
    Error(ConnectionError),
    Message { from: ConnectionId, line: String },
    Disconnected,
}

/// A [`ClientHandler`] forwarding every callback as a [`ClientEvent`] on an
/// unbounded tokio channel.
pub struct ChannelClientHandler {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelClientHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }
}

impl ClientHandler for ChannelClientHandler {
    fn on_connected(&self, client: &Client) {
        self.emit(ClientEvent::Connected {
            address: client.address(),
            port: client.port(),
        });
    }

    fn on_error(&self, _client: &Client, error: ConnectionError) {
        self.emit(ClientEvent::Error(error));
    }

    fn on_message(&self, _client: &Client, from: ConnectionId, line: String) {
        self.emit(ClientEvent::Message { from, line });
    }

    fn on_disconnected(&self, _client: &Client) {
        self.emit(ClientEvent::Disconnected);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lanline_core::ErrorKind;

    #[test]
    fn test_callbacks_become_events_in_order() {
        // Arrange
        let (handler, mut rx) = ChannelClientHandler::new();
        let client = Client::new(MockClientHandler::new()).unwrap();
        let id = ConnectionId::new();

        // Act
        handler.on_message(&client, id, "one".to_string());
        handler.on_error(&client, ConnectionError::new(ErrorKind::Output));
        handler.on_disconnected(&client);

        // Assert
        assert!(matches!(rx.try_recv(), Ok(ClientEvent::Message { from, line }) if from == id && line == "one"));
        assert!(matches!(rx.try_recv(), Ok(ClientEvent::Error(e)) if e.kind() == ErrorKind::Output));
        assert!(matches!(rx.try_recv(), Ok(ClientEvent::Disconnected)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_does_not_panic() {
        let (handler, rx) = ChannelClientHandler::new();
        drop(rx);
        let client = Client::new(MockClientHandler::new()).unwrap();

        handler.on_message(&client, ConnectionId::new(), "nobody listening".to_string());
    }
}
