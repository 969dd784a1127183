//! Storage infrastructure: the client's TOML configuration file.

pub mod config;
