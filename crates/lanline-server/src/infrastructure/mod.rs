//! Infrastructure layer for the server.
//!
//! Contains the OS-facing adapters: the TCP endpoint and the configuration
//! file.

pub mod network;
pub mod storage;
