//! ReaderLoop: the per-socket blocking read task.
//!
//! One reader thread is spawned for every open socket.  It blocks on line
//! reads and hands each line to a callback on its own thread.  When the stream
//! ends, fails, or the line callback panics, the loop stops and its finalizer
//! runs exactly once with the reason.
//!
//! The finalizer is how a reader reports its death: endpoints use it to submit
//! a cleanup command to their `CommandQueue` instead of touching shared state
//! from the reader thread.  It is guarded with `scopeguard`, so it still fires
//! if the line callback unwinds.

use std::fmt;
use std::io::{self, Read};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use crate::domain::identity::ConnectionId;
use crate::protocol::line::LineReader;

/// Why a reader loop stopped.
#[derive(Debug)]
pub enum ReadOutcome {
    /// The peer closed the stream (or the local side shut it down).
    Closed,
    /// A read failed.
    Failed(io::Error),
    /// The line callback panicked.
    Aborted,
}

impl ReadOutcome {
    /// `true` for a clean end of stream.
    pub fn is_clean(&self) -> bool {
        matches!(self, ReadOutcome::Closed)
    }
}

impl fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadOutcome::Closed => f.write_str("stream closed"),
            ReadOutcome::Failed(e) => write!(f, "read failed: {e}"),
            ReadOutcome::Aborted => f.write_str("line handler panicked"),
        }
    }
}

/// A reader task bound to one connection.
pub struct ReaderLoop {
    id: ConnectionId,
}

impl ReaderLoop {
    pub fn new(id: ConnectionId) -> Self {
        Self { id }
    }

    /// The connection this loop reads from.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Spawns the reader thread.
    ///
    /// `on_line` is called for every inbound line, in order, on the reader
    /// thread.  `finalizer` is called exactly once when the loop ends.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.  The finalizer is
    /// not called in that case; the caller still owns the cleanup.
    pub fn spawn<R, F, G>(self, reader: R, on_line: F, finalizer: G) -> io::Result<JoinHandle<()>>
    where
        R: Read + Send + 'static,
        F: FnMut(ConnectionId, String) + Send + 'static,
        G: FnOnce(ConnectionId, ReadOutcome) + Send + 'static,
    {
        let id = self.id;
        thread::Builder::new()
            .name(format!("lanline-reader-{id}"))
            .spawn(move || self.run(reader, on_line, finalizer))
    }

    /// Runs the loop on the current thread.
    pub fn run<R, F, G>(self, reader: R, mut on_line: F, finalizer: G)
    where
        R: Read,
        F: FnMut(ConnectionId, String),
        G: FnOnce(ConnectionId, ReadOutcome),
    {
        let id = self.id;
        debug!(connection = %id, "reader started");

        let guard = scopeguard::guard(finalizer, move |finalize| {
            debug!(connection = %id, "reader aborted");
            finalize(id, ReadOutcome::Aborted);
        });

        let mut lines = LineReader::new(reader);
        let outcome = loop {
            match lines.next_line() {
                Ok(Some(line)) => {
                    trace!(connection = %id, len = line.len(), "line received");
                    on_line(id, line);
                }
                Ok(None) => break ReadOutcome::Closed,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break ReadOutcome::Failed(e),
            }
        };

        debug!(connection = %id, %outcome, "reader stopped");
        let finalize = scopeguard::ScopeGuard::into_inner(guard);
        finalize(id, outcome);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
