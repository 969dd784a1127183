//! Line codec: payload encoding and line splitting.
//!
//! Wire format:
//! ```text
//! <text>\n          println
//! <text>            print (the peer assembles lines itself)
//! ```
//!
//! Integers and booleans travel as their canonical text (`42`, `-7`, `true`).
//! On the receiving side a trailing `\r\n` is accepted as well as `\n`, a last
//! line without terminator is still delivered at end of stream, and invalid
//! UTF-8 is decoded lossily rather than dropping the line.  A line longer than
//! [`MAX_LINE_LEN`] bytes is a protocol error that ends the stream.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};

use crate::error::{ConnectionError, ErrorKind};

/// Size of the read buffer wrapped around each socket.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Longest line a [`LineReader`] accepts, terminator excluded.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// A value that can be sent with `print` / `println`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(s) => f.write_str(s),
            Payload::Int(n) => write!(f, "{n}"),
            Payload::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&String> for Payload {
    fn from(s: &String) -> Self {
        Payload::Text(s.clone())
    }
}

impl From<i32> for Payload {
    fn from(n: i32) -> Self {
        Payload::Int(i64::from(n))
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Int(n)
    }
}

impl From<u32> for Payload {
    fn from(n: u32) -> Self {
        Payload::Int(i64::from(n))
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

/// Encodes `payload` into the bytes written to the socket.
///
/// With `newline` set the result is one complete line.
///
/// # Errors
///
/// Returns [`ErrorKind::Protocol`] if `newline` is set and the text already
/// contains a line break, which would split it into several messages.
pub fn encode_payload(payload: &Payload, newline: bool) -> Result<Vec<u8>, ConnectionError> {
    let text = payload.to_string();
    if newline && text.contains(['\n', '\r']) {
        return Err(ConnectionError::with_message(
            ErrorKind::Protocol,
            "line payload contains an embedded line break",
        ));
    }
    let mut buf = Vec::with_capacity(text.len() + 1);
    buf.extend_from_slice(text.as_bytes());
    if newline {
        buf.push(b'\n');
    }
    Ok(buf)
}

/// Splits a byte stream into lines.
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    limit: usize,
}

impl<R: Read> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, MAX_LINE_LEN)
    }

    /// A reader that rejects lines longer than `limit` bytes.
    pub fn with_limit(reader: R, limit: usize) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER_SIZE, reader),
            buf: Vec::with_capacity(256),
            limit,
        }
    }

    /// Blocks until a full line (or end of stream) is available.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream and every
    /// buffered byte has been delivered.
    ///
    /// # Errors
    ///
    /// An [`io::ErrorKind::InvalidData`] error if the line exceeds the limit;
    /// the rest of that line is left unread.
    pub fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        // Room for the longest accepted line plus "\r\n".
        let window = self.limit.saturating_add(2) as u64;
        let n = (&mut self.inner).take(window).read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        if self.buf.len() > self.limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line longer than {} bytes", self.limit),
            ));
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

impl<R: Read> Iterator for LineReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
