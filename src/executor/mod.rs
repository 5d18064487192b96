//! Contract between the command server and the application it drives.
//!
//! The server never interprets a command; it hands the name and parameters
//! to a [`CommandExecutor`] and relays whatever comes back. Implementations
//! live on the application side. [`registry::CommandRegistry`] is the
//! typed building block for them and [`scene::SceneExecutor`] an in-memory
//! stand-in used for local runs and tests.

pub mod registry;
pub mod scene;

use std::fmt::{Display, Formatter};

use serde_json::{Map, Value};

pub use registry::CommandRegistry;
pub use scene::SceneExecutor;

/// Domain failure reported by an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorError {
    message: String,
}

impl ExecutorError {
    /// Error carrying `message` verbatim.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Error for a command name with no registered handler.
    #[must_use]
    pub fn unknown_command(name: &str) -> Self {
        Self::new(format!("Unknown command type: {name}"))
    }

    /// Message sent back to the client.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ExecutorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExecutorError {}

impl From<String> for ExecutorError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ExecutorError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Executes named commands against live application state.
///
/// Called from the blocking thread pool, one command at a time per
/// connection. A panic inside `execute` is caught by the server and
/// reported as an error result.
pub trait CommandExecutor: Send + Sync {
    /// Run command `name` with `params`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] for unknown commands, invalid parameters,
    /// or any domain failure.
    fn execute(&self, name: &str, params: Map<String, Value>) -> Result<Value, ExecutorError>;
}
