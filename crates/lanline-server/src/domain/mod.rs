//! Server domain state.
//!
//! - **`registry`** – [`ClientRegistry`](registry::ClientRegistry), the
//!   lock-guarded map from connection identity to outbound writer.

pub mod registry;
