//! Bridge configuration parsing and validation.
//!
//! Every field carries a default so an empty TOML document (or no file at
//! all) yields a working local setup: command server on `localhost:9877`,
//! relay on `localhost:8080`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Default upper bound on a single buffered frame: 16 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Largest accepted value for any `*_timeout_seconds` setting: one day.
pub const MAX_TIMEOUT_SECONDS: u64 = 86_400;

fn default_host() -> String {
    "localhost".into()
}

fn default_server_port() -> u16 {
    9877
}

fn default_relay_port() -> u16 {
    8080
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_read_chunk_bytes() -> usize {
    8192
}

fn default_timeout_seconds() -> u64 {
    15
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

fn default_write_timeout_seconds() -> u64 {
    15
}

fn default_probe_command() -> String {
    "get_scene_info".into()
}

fn default_server_name() -> String {
    "command-bridge".into()
}

fn default_protocol_version() -> String {
    "2024-11-05".into()
}

/// Command server listener settings (application side).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port to bind; `0` picks an ephemeral port.
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Maximum bytes buffered for one inbound command.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Size of each socket read.
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
    /// Whether commands registered as privileged may run.
    #[serde(default)]
    pub allow_privileged: bool,
    /// Seconds a reply may wait on a peer that is not reading before the
    /// peer is dropped.
    #[serde(default = "default_write_timeout_seconds")]
    pub write_timeout_seconds: u64,
}

impl ServerConfig {
    /// Write deadline as a `Duration`.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_server_port(),
            max_frame_bytes: default_max_frame_bytes(),
            read_chunk_bytes: default_read_chunk_bytes(),
            allow_privileged: false,
            write_timeout_seconds: default_write_timeout_seconds(),
        }
    }
}

/// Client-side connection settings used by the relay and `command-bridge-ctl`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Command server host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Command server port.
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Per-call response deadline.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Deadline for establishing the TCP connection.
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    /// Cheap command sent to check that a reused connection is alive.
    #[serde(default = "default_probe_command")]
    pub probe_command: String,
    /// Maximum bytes buffered for one response.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl ClientConfig {
    /// Per-call response deadline as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Connect deadline as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// `host:port` string of the command server.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_server_port(),
            timeout_seconds: default_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            probe_command: default_probe_command(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Transport the relay accepts agent requests on.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelayTransport {
    /// TCP listener with delimiter-less JSON framing.
    #[default]
    Tcp,
    /// Newline-delimited JSON over stdin/stdout.
    Stdio,
}

/// Agent-facing relay settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Interface to bind for the TCP transport.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port for the TCP transport.
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// Which transport to serve.
    #[serde(default)]
    pub transport: RelayTransport,
    /// Name reported in `initialize`.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Protocol version reported in `initialize`.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Seconds a response may wait on an agent that is not reading before
    /// the connection is closed.
    #[serde(default = "default_write_timeout_seconds")]
    pub write_timeout_seconds: u64,
}

impl RelayConfig {
    /// Write deadline as a `Duration`.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_relay_port(),
            transport: RelayTransport::default(),
            server_name: default_server_name(),
            protocol_version: default_protocol_version(),
            write_timeout_seconds: default_write_timeout_seconds(),
        }
    }
}

/// Top-level configuration parsed from `bridge.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Command server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Client connection settings.
    #[serde(default)]
    pub client: ClientConfig,
    /// Relay settings.
    #[serde(default)]
    pub relay: RelayConfig,
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.server.read_chunk_bytes == 0 {
            return Err(AppError::Config(
                "server.read_chunk_bytes must be greater than zero".into(),
            ));
        }

        if self.server.max_frame_bytes < self.server.read_chunk_bytes {
            return Err(AppError::Config(
                "server.max_frame_bytes must be at least server.read_chunk_bytes".into(),
            ));
        }

        if self.client.port == 0 {
            return Err(AppError::Config(
                "client.port must be greater than zero".into(),
            ));
        }

        let timeouts = [
            ("server.write_timeout_seconds", self.server.write_timeout_seconds),
            ("client.timeout_seconds", self.client.timeout_seconds),
            ("client.connect_timeout_seconds", self.client.connect_timeout_seconds),
            ("relay.write_timeout_seconds", self.relay.write_timeout_seconds),
        ];
        for (field, seconds) in timeouts {
            if seconds == 0 || seconds > MAX_TIMEOUT_SECONDS {
                return Err(AppError::Config(format!(
                    "{field} must be between 1 and {MAX_TIMEOUT_SECONDS}"
                )));
            }
        }

        if self.client.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "client.max_frame_bytes must be greater than zero".into(),
            ));
        }

        if self.client.probe_command.trim().is_empty() {
            return Err(AppError::Config(
                "client.probe_command must not be empty".into(),
            ));
        }

        Ok(())
    }
}
