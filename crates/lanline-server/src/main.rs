//! lanline relay server entry point.
//!
//! ```text
//! lanline-server [config.toml]
//!  └─ AppConfig::load_from()   -- defaults when no path is given
//!  └─ Server::with_options(RelayHandler)
//!       └─ connect(port)       -- bind thread, then accept loop
//!  └─ wait for Ctrl-C
//!  └─ disconnect(), wait for on_disconnected, terminate()
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lanline_server::{AppConfig, RelayHandler, Server};

/// Upper bound on the wait for teardown after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load_from(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::default(),
    };

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("lanline server starting");

    let options = config.server.options();
    let relay = RelayHandler::new(config.server.allowed_hosts.clone());
    let stopped = relay.stopped();
    let server = Server::with_options(relay, options)?;
    server
        .connect(config.server.port)
        .context("starting the server")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutdown signal received");

    if server.is_connected() {
        server.disconnect()?;
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, stopped.notified())
            .await
            .is_err()
        {
            warn!("teardown did not finish in time");
        }
    }
    if let Err(e) = server.terminate() {
        warn!("command queue not stopped: {e}");
    }

    info!("lanline server stopped");
    Ok(())
}
