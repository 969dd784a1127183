//! Infrastructure layer for the client: the TCP endpoint and the
//! configuration file.

pub mod network;
pub mod storage;
