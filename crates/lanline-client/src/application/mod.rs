//! Application layer use cases for the client binary.
//!
//! - **`console`** – Forwards input lines to the server and prints the lines
//!   it sends back.

pub mod console;
