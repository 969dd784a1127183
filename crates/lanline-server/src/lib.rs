//! lanline-server library entry point.
//!
//! A [`Server`] accepts many concurrent TCP clients and exchanges
//! newline-terminated text lines with them.  The application supplies a
//! [`ServerHandler`] for connection, message and error notifications.
//!
//! ```no_run
//! use lanline_server::{ChannelServerHandler, Server, ServerEvent};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (handler, mut events) = ChannelServerHandler::new();
//! let server = Server::new(handler)?;
//! server.connect(5050)?;
//! while let Some(event) = events.recv().await {
//!     if let ServerEvent::Message { from, line } = event {
//!         server.println_to(from, format!("echo {line}"))?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::relay::RelayHandler;
pub use domain::registry::ClientRegistry;
pub use infrastructure::network::handler::{ChannelServerHandler, ServerEvent, ServerHandler};
pub use infrastructure::network::server::{Server, ServerOptions};
pub use infrastructure::storage::config::{AppConfig, ConfigError};
