//! RelayUseCase: fan each inbound line out to every other client.
//!
//! Each relayed line is prefixed with the short form of the sender's
//! identity:
//!
//! ```text
//! client 1a2b3c4d sends  "hello"
//! every other client     "1a2b3c4d: hello"
//! ```
//!
//! Admission is restricted to `allowed_hosts` when that list is non-empty.
//! [`RelayHandler::stopped`] resolves once the server has finished tearing
//! down.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use lanline_core::{ConnectionError, ConnectionId};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::infrastructure::network::handler::ServerHandler;
use crate::infrastructure::network::server::Server;

/// Relays lines between clients of one [`Server`].
#[derive(Debug, Clone, Default)]
pub struct RelayHandler {
    allowed_hosts: Vec<IpAddr>,
    stopped: Arc<Notify>,
}

impl RelayHandler {
    /// Creates a relay admitting only `allowed_hosts` (everyone if empty).
    pub fn new(allowed_hosts: Vec<IpAddr>) -> Self {
        Self {
            allowed_hosts,
            stopped: Arc::new(Notify::new()),
        }
    }

    /// Notified from `on_disconnected`.  A notification that fires before
    /// anyone waits is kept for the next `notified().await`.
    pub fn stopped(&self) -> Arc<Notify> {
        Arc::clone(&self.stopped)
    }

    /// `true` if a peer at `ip` may connect.
    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        self.allowed_hosts.is_empty() || self.allowed_hosts.contains(&ip)
    }
}

/// Formats one relayed line.
pub fn relay_line(from: ConnectionId, line: &str) -> String {
    format!("{from}: {line}")
}

impl ServerHandler for RelayHandler {
    fn on_connected(&self, server: &Server) {
        info!(port = server.port(), "relay ready");
    }

    fn on_error(&self, _server: &Server, error: ConnectionError) {
        warn!("relay: {error}");
    }

    fn on_message(&self, server: &Server, from: ConnectionId, line: String) {
        let relayed = relay_line(from, &line);
        for client in server.clients().into_iter().filter(|c| *c != from) {
            // A peer may leave between the snapshot and the send.
            if let Err(e) = server.println_to(client, relayed.as_str()) {
                debug!(client = %client, "relay skipped: {e}");
            }
        }
    }

    fn accept_client(&self, _server: &Server, address: SocketAddr) -> bool {
        let allowed = self.is_allowed(address.ip());
        if !allowed {
            info!(%address, "host not in allowed_hosts; rejecting");
        }
        allowed
    }

    fn on_new_client(&self, server: &Server, client: ConnectionId) {
        info!(client = %client, total = server.client_count(), "client joined");
    }

    fn on_client_removed(&self, server: &Server, client: ConnectionId) {
        info!(client = %client, total = server.client_count(), "client left");
    }

    fn on_disconnected(&self, _server: &Server) {
        info!("relay stopped");
        self.stopped.notify_one();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
