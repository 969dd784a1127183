//! Network infrastructure for the client.
//!
//! - **`handler`** – [`ClientHandler`](handler::ClientHandler) callbacks and
//!   the channel adapter producing [`ClientEvent`](handler::ClientEvent)s.
//! - **`client`** – The [`Client`](client::Client) endpoint.

pub mod client;
pub mod handler;
