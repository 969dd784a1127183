//! CommandQueue: a single-worker sequential task executor.
//!
//! Every outbound write and every state mutation of an endpoint is submitted
//! here as a closure.  One dedicated thread pops the closures in FIFO order and
//! runs them one at a time, so two sends never interleave and a send can never
//! race the teardown that closes its socket.
//!
//! # Owned session state
//!
//! The queue is generic over a session type `S` that the worker thread owns
//! outright.  Tasks receive `&mut S`:
//!
//! ```text
//!  caller thread A ──submit(|s| ...)──┐
//!  caller thread B ──submit(|s| ...)──┼──► [ FIFO channel ] ──► worker: task(&mut S)
//!  reader thread   ──submit(|s| ...)──┘
//! ```
//!
//! Anything stored in `S` (the client's socket writer, the server's acceptor
//! handle) is reachable only from the worker, so the single-writer rule is
//! enforced by ownership rather than by a lock.
//!
//! # Why a tokio channel on a plain thread?
//!
//! `UnboundedSender::send` never blocks and never needs a runtime, so any
//! thread (including async tasks) may submit.  The worker drains it with
//! `blocking_recv` on its own OS thread.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, ThreadId};

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{ConnectionError, ErrorKind};

type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

enum Command<S> {
    Run(Task<S>),
    Stop,
}

/// A FIFO executor bound to one background worker thread.
pub struct CommandQueue<S> {
    tx: mpsc::UnboundedSender<Command<S>>,
    terminated: AtomicBool,
    worker: ThreadId,
    name: String,
}

impl<S: Send + 'static> CommandQueue<S> {
    /// Spawns the worker thread, moving `state` onto it.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(name: impl Into<String>, state: S) -> io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(rx, state))?;

        debug!(queue = %name, "command queue started");
        Ok(Self {
            tx,
            terminated: AtomicBool::new(false),
            worker: handle.thread().id(),
            name,
        })
    }

    /// Appends a task.  It runs after every previously submitted task.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotStarted`] once the queue has been terminated.
    pub fn submit<F>(&self, task: F) -> Result<(), ConnectionError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if self.terminated.load(Ordering::Acquire) {
            return Err(self.stopped_error());
        }
        self.tx
            .send(Command::Run(Box::new(task)))
            .map_err(|_| self.stopped_error())
    }

    /// Blocks until every task submitted before this call has run.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Busy`] when called from a task on this queue (it would
    /// wait on itself), [`ErrorKind::NotStarted`] after termination.
    pub fn flush(&self) -> Result<(), ConnectionError> {
        if self.is_worker_thread() {
            return Err(ConnectionError::with_message(
                ErrorKind::Busy,
                "flush called from the command queue worker",
            ));
        }
        let (done_tx, done_rx) = std_mpsc::sync_channel(1);
        self.submit(move |_| {
            let _ = done_tx.send(());
        })?;
        done_rx.recv().map_err(|_| self.stopped_error())
    }

    /// Stops accepting tasks.  Tasks already queued still run, then the
    /// worker exits.
    ///
    /// When called from outside the worker this waits for the drain to finish.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotStarted`] if the queue was already terminated.
    pub fn terminate(&self) -> Result<(), ConnectionError> {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return Err(self.stopped_error());
        }
        let wait = !self.is_worker_thread();
        let (done_tx, done_rx) = std_mpsc::sync_channel(1);
        // Queued ahead of Stop, so it fires once everything before it has run.
        let _ = self.tx.send(Command::Run(Box::new(move |_| {
            let _ = done_tx.send(());
        })));
        let _ = self.tx.send(Command::Stop);
        if wait {
            let _ = done_rx.recv();
        }
        debug!(queue = %self.name, "command queue terminated");
        Ok(())
    }

    /// `true` once [`terminate`](Self::terminate) has been called.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// `true` when the current thread is this queue's worker.
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker
    }

    fn stopped_error(&self) -> ConnectionError {
        ConnectionError::with_message(
            ErrorKind::NotStarted,
            format!("command queue {} is terminated", self.name),
        )
    }
}

/// Runs tasks until `Stop` arrives or every sender is gone.
fn worker_loop<S>(mut rx: mpsc::UnboundedReceiver<Command<S>>, mut state: S) {
    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Run(task) => {
                // A panicking callback must not take the whole endpoint down.
                let result = panic::catch_unwind(AssertUnwindSafe(|| task(&mut state)));
                if result.is_err() {
                    error!("command queue task panicked; continuing");
                }
            }
            Command::Stop => break,
        }
    }
    debug!("command queue worker exiting");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
