//! lanline-client library entry point.
//!
//! A [`Client`] holds one TCP connection to a lanline server and exchanges
//! newline-terminated text lines with it.  Notifications arrive through a
//! [`ClientHandler`]; [`ChannelClientHandler`] turns them into
//! [`ClientEvent`]s for async consumers.

pub mod application;
pub mod infrastructure;

pub use application::console::{run_console, ConsoleExit};
pub use infrastructure::network::client::Client;
pub use infrastructure::network::handler::{ChannelClientHandler, ClientEvent, ClientHandler};
pub use infrastructure::storage::config::{AppConfig, ConfigError};
