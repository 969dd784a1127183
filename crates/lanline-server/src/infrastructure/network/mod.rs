//! Network infrastructure for the server.
//!
//! # Sub-modules
//!
//! - **`handler`** – The [`ServerHandler`](handler::ServerHandler) callback
//!   interface the application implements, plus a channel adapter that turns
//!   callbacks into [`ServerEvent`](handler::ServerEvent) values.
//!
//! - **`server`** – The [`Server`](server::Server) endpoint: bind thread,
//!   accept loop, per-client readers, and queued sends.

pub mod handler;
pub mod server;
