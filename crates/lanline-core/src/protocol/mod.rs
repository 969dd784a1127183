//! The lanline wire format.
//!
//! A message is one line of UTF-8 text terminated by `\n`.  There is no
//! length prefix, no binary framing and no escaping: see [`line`].

pub mod line;
