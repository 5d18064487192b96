//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering every failure mode of the bridge.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Buffered bytes can never become valid JSON; the buffer was reset.
    MalformedFrame(String),
    /// A frame grew past the configured byte limit; the buffer was reset.
    FrameTooLarge(String),
    /// No complete frame arrived before the per-call deadline.
    Timeout(String),
    /// Peer closed the connection before any byte of a response arrived.
    ConnectionClosed(String),
    /// Peer closed the connection with a partial frame buffered.
    IncompleteResponse(String),
    /// The command server could not be reached.
    Unavailable(String),
    /// The command executor reported a domain failure.
    Executor(String),
    /// Relay received a JSON-RPC method it does not serve.
    MethodNotFound(String),
    /// Relay received a tool name that has no entry in the tool table.
    UnknownTool(String),
    /// Request parameters are missing or have the wrong shape.
    InvalidParams(String),
    /// Peer sent well-formed JSON that violates the wire contract.
    Protocol(String),
    /// Socket or file-system failure.
    Io(String),
}

impl AppError {
    /// Whether this error leaves the connection it occurred on unusable.
    ///
    /// Callers holding a persistent connection must discard it and
    /// reconnect before the next request when this returns `true`.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame(_)
                | Self::FrameTooLarge(_)
                | Self::Timeout(_)
                | Self::ConnectionClosed(_)
                | Self::IncompleteResponse(_)
                | Self::Protocol(_)
                | Self::Io(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::MalformedFrame(msg) => write!(f, "malformed frame: {msg}"),
            Self::FrameTooLarge(msg) => write!(f, "frame too large: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::ConnectionClosed(msg) => write!(f, "connection closed: {msg}"),
            Self::IncompleteResponse(msg) => write!(f, "incomplete response: {msg}"),
            Self::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            Self::Executor(msg) => write!(f, "executor: {msg}"),
            Self::MethodNotFound(msg) => write!(f, "method not found: {msg}"),
            Self::UnknownTool(msg) => write!(f, "unknown tool: {msg}"),
            Self::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("json: {err}"))
    }
}
