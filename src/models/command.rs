//! Command and result records exchanged with the command server.
//!
//! Wire shapes:
//!
//! ```json
//! {"type": "get_scene_info", "params": {}}
//! {"status": "success", "result": {"ok": true}}
//! {"status": "error", "message": "Unknown command type: frobnicate"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// A named operation plus its parameter mapping.
///
/// Fields are private so a command cannot change after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    name: String,
    #[serde(default)]
    params: Map<String, Value>,
}

impl Command {
    /// Build a command from a name and parameter map.
    #[must_use]
    pub fn new(name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Build a command with no parameters.
    #[must_use]
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, Map::new())
    }

    /// Command name as sent in the `type` field.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter mapping as sent in the `params` field.
    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Consume the command into its name and parameters.
    #[must_use]
    pub fn into_parts(self) -> (String, Map<String, Value>) {
        (self.name, self.params)
    }

    /// Encode into the wire JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "type": self.name, "params": self.params })
    }

    /// Decode a received frame into a command.
    ///
    /// `params` may be absent or `null`, both meaning "no parameters".
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` when the frame is not an object, has no
    /// string `type`, or carries non-object `params`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(AppError::Protocol("command must be a JSON object".into()));
        };

        let name = match object.remove("type") {
            Some(Value::String(name)) => name,
            Some(_) => return Err(AppError::Protocol("command `type` must be a string".into())),
            None => return Err(AppError::Protocol("command is missing `type`".into())),
        };

        let params = match object.remove("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(params)) => params,
            Some(_) => {
                return Err(AppError::Protocol(format!(
                    "params for `{name}` must be a JSON object"
                )))
            }
        };

        Ok(Self { name, params })
    }
}

/// Outcome of one command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandResult {
    /// Executor finished; `result` is its JSON output.
    Success {
        /// Executor output.
        #[serde(default)]
        result: Value,
    },
    /// Executor or server refused the command.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

impl CommandResult {
    /// Successful result carrying `result`.
    #[must_use]
    pub fn success(result: Value) -> Self {
        Self::Success { result }
    }

    /// Error result carrying `message`.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this is a success result.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Encode into the wire JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Success { result } => {
                serde_json::json!({ "status": "success", "result": result })
            }
            Self::Error { message } => {
                serde_json::json!({ "status": "error", "message": message })
            }
        }
    }

    /// Decode a response frame received from the command server.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the frame does not match either
    /// result shape.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|err| AppError::Protocol(format!("unexpected response shape: {err}")))
    }

    /// Convert into the executor output, surfacing error results.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Executor` carrying the server's message for
    /// error results.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Self::Success { result } => Ok(result),
            Self::Error { message } => Err(AppError::Executor(message)),
        }
    }
}
