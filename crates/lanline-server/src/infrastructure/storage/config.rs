//! TOML configuration for the server binary.
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 5050
//! accept_backoff_ms = 50
//! max_clients = 0
//! allowed_hosts = ["127.0.0.1", "192.168.1.20"]
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every field has a serde default, so an empty file (or no file at all) is a
//! valid configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::server::ServerOptions;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening socket settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// TCP port to listen on; `0` lets the OS pick one.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Pause after a failed `accept` before trying again.
    #[serde(default = "default_accept_backoff_ms")]
    pub accept_backoff_ms: u64,
    /// Maximum simultaneous clients; `0` means unlimited.
    #[serde(default)]
    pub max_clients: usize,
    /// Remote IPs allowed to connect.  Empty allows everyone.
    #[serde(default)]
    pub allowed_hosts: Vec<IpAddr>,
}

/// `tracing` settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset: `"error"` .. `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_port() -> u16 {
    5050
}
fn default_accept_backoff_ms() -> u64 {
    50
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            accept_backoff_ms: default_accept_backoff_ms(),
            max_clients: 0,
            allowed_hosts: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Endpoint options derived from this section.
    pub fn options(&self) -> ServerOptions {
        ServerOptions {
            bind_address: self.bind_address,
            accept_backoff: Duration::from_millis(self.accept_backoff_ms.max(1)),
            max_clients: self.max_clients,
        }
    }
}

// ── Loading / saving ──────────────────────────────────────────────────────────

impl AppConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Renders the config as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Loads the config at `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
