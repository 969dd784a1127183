//! Application layer use cases for the server binary.
//!
//! # Sub-modules
//!
//! - **`relay`** – A [`ServerHandler`](crate::infrastructure::network::handler::ServerHandler)
//!   that fans every inbound line out to the other connected clients and
//!   admits only configured hosts.

pub mod relay;
