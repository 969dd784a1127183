//! ConsoleUseCase: bridge a line-based input/output pair to a [`Client`].
//!
//! Every input line is sent to the server with `println`; every line from the
//! server is written to `out`.  The loop ends when the input is exhausted or
//! the connection goes away, whichever happens first.  Pending server events
//! are always handled before the next input line.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::infrastructure::network::client::Client;
use crate::infrastructure::network::handler::ClientEvent;

/// Why [`run_console`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The input reached end of file.
    InputClosed,
    /// The client disconnected (or its event stream ended).
    Disconnected,
}

/// Runs the console loop until input ends or the connection is lost.
///
/// # Errors
///
/// Returns the I/O error if reading `input` or writing `out` fails.
pub async fn run_console<R, W>(
    client: &Client,
    input: R,
    events: &mut UnboundedReceiver<ClientEvent>,
    mut out: W,
) -> std::io::Result<ConsoleExit>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    loop {
        tokio::select! {
            biased;

            event = events.recv() => match event {
                Some(ClientEvent::Message { line, .. }) => {
                    writeln!(out, "{line}")?;
                    out.flush()?;
                }
                Some(ClientEvent::Error(e)) => warn!("{e}"),
                Some(ClientEvent::Connected { .. }) => {}
                Some(ClientEvent::Disconnected) | None => return Ok(ConsoleExit::Disconnected),
            },

            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = client.println(line) {
                        warn!("not sent: {e}");
                    }
                }
                None => {
                    debug!("console input closed");
                    return Ok(ConsoleExit::InputClosed);
                }
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
