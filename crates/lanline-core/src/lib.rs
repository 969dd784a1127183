//! # lanline-core
//!
//! Shared building blocks for the two lanline endpoint roles: a server that
//! accepts many clients and a client that dials one server.  Both sides speak
//! newline-terminated text over TCP on a local network.
//!
//! # Architecture overview (for beginners)
//!
//! Every endpoint has three kinds of threads:
//!
//! ```text
//!   connect()  ──►  connection thread  (dial / bind, transient)
//!                         │
//!                         ▼
//!   CommandQueue worker  (one per endpoint, runs every state mutation
//!                         and every socket write, one at a time)
//!                         ▲
//!                         │ cleanup command
//!   ReaderLoop           (one per socket, blocks on line reads)
//! ```
//!
//! This crate holds the pieces both roles share:
//!
//! - **`error`** – The [`ConnectionError`] value and its [`ErrorKind`]
//!   taxonomy.  Failures detected on a background thread are reported as a
//!   value through a callback, never thrown across a thread boundary.
//!
//! - **`domain`** – [`ConnectionId`], the opaque token naming one socket, and
//!   [`LinkState`], the endpoint's connect/disconnect state cell.
//!
//! - **`protocol`** – The line wire format: how [`Payload`]s become bytes and
//!   how a byte stream is split back into lines.
//!
//! - **`concurrency`** – The [`CommandQueue`] single-worker executor and the
//!   [`ReaderLoop`] task with its guaranteed finalizer.

pub mod concurrency;
pub mod domain;
pub mod error;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `lanline_core::ConnectionId` instead of `lanline_core::domain::identity::ConnectionId`.
pub use concurrency::queue::CommandQueue;
pub use concurrency::reader::{ReadOutcome, ReaderLoop};
pub use domain::identity::ConnectionId;
pub use domain::state::{ConnectionState, LinkState};
pub use error::{ConnectionError, ErrorKind};
pub use protocol::line::{encode_payload, LineReader, Payload, MAX_LINE_LEN};
