//! lanline console client entry point.
//!
//! ```text
//! lanline-client [config.toml]
//!  └─ Client::connect(host, port)
//!  └─ wait for Connected (or the dial error)
//!  └─ run_console(stdin, stdout)   -- until stdin closes or the server leaves
//!  └─ disconnect() + terminate()
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::BufReader;
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lanline_client::{run_console, AppConfig, ChannelClientHandler, Client, ClientEvent, ConsoleExit};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load_from(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::default(),
    };

    // Logs go to stderr so they do not mix with relayed lines on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let (handler, mut events) = ChannelClientHandler::new();
    let client = Client::new(handler)?;
    client
        .connect(config.client.host.as_str(), config.client.port)
        .context("starting the connection")?;

    match events.recv().await {
        Some(ClientEvent::Connected { .. }) => {
            info!(host = %config.client.host, port = config.client.port, "connected");
        }
        Some(ClientEvent::Error(e)) => bail!(e),
        other => bail!("unexpected event while connecting: {other:?}"),
    }

    let exit = run_console(
        &client,
        BufReader::new(tokio::io::stdin()),
        &mut events,
        std::io::stdout(),
    )
    .await?;
    info!(?exit, "console finished");

    if exit == ConsoleExit::InputClosed && client.is_connected() {
        client.disconnect()?;
        let closed = timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if matches!(event, ClientEvent::Disconnected) {
                    break;
                }
            }
        })
        .await;
        if closed.is_err() {
            warn!("teardown did not finish in time");
        }
    }
    if let Err(e) = client.terminate() {
        warn!("command queue not stopped: {e}");
    }
    Ok(())
}
