//! JSON-RPC envelopes spoken between the agent and the relay.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppError;

/// Protocol marker carried by every response.
pub const JSONRPC_VERSION: &str = "2.0";

/// Inbound bytes were not valid JSON.
pub const PARSE_ERROR: i64 = -32_700;
/// JSON was valid but not a request object.
pub const INVALID_REQUEST: i64 = -32_600;
/// The method is not served by the relay.
pub const METHOD_NOT_FOUND: i64 = -32_601;
/// Parameters missing, mistyped, or naming an unknown tool.
pub const INVALID_PARAMS: i64 = -32_602;
/// Transport or relay-internal failure.
pub const INTERNAL_ERROR: i64 = -32_603;
/// The command executor reported a domain failure.
pub const EXECUTOR_ERROR: i64 = -32_000;

/// Agent request envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcRequest {
    /// Correlation id echoed in the response; `null` when absent.
    #[serde(default)]
    pub id: Value,
    /// Requested method.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// Interpret a decoded frame as a request.
    ///
    /// On failure the returned error response carries whatever `id` could
    /// be recovered from the frame, or `null`.
    ///
    /// # Errors
    ///
    /// Returns an `INVALID_REQUEST` response when the frame is not a
    /// request object.
    pub fn from_value(value: Value) -> Result<Self, RpcResponse> {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|err| {
            RpcResponse::failure(id, RpcError::new(INVALID_REQUEST, format!("Invalid request: {err}")))
        })
    }
}

/// Error object of a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

impl RpcError {
    /// Construct an error object.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&AppError> for RpcError {
    fn from(err: &AppError) -> Self {
        match err {
            AppError::MethodNotFound(method) => {
                Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
            }
            AppError::UnknownTool(tool) => Self::new(INVALID_PARAMS, format!("Unknown tool: {tool}")),
            AppError::InvalidParams(msg) => Self::new(INVALID_PARAMS, format!("Invalid params: {msg}")),
            AppError::Executor(msg) => Self::new(EXECUTOR_ERROR, msg.clone()),
            AppError::MalformedFrame(msg) => Self::new(PARSE_ERROR, format!("Parse error: {msg}")),
            other => Self::new(INTERNAL_ERROR, format!("Internal error: {other}")),
        }
    }
}

/// Outbound response envelope; exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Echo of the request id, or `null`.
    pub id: Value,
    /// Success payload; `Some(Value::Null)` serialises as `"result": null`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Success response for `id`.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Failure response for `id`.
    #[must_use]
    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Failure response built from an application error.
    #[must_use]
    pub fn from_error(id: Value, err: &AppError) -> Self {
        Self::failure(id, RpcError::from(err))
    }

    /// Encode as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = serde_json::Map::new();
        object.insert("jsonrpc".into(), Value::String(self.jsonrpc.clone()));
        object.insert("id".into(), self.id.clone());
        if let Some(ref result) = self.result {
            object.insert("result".into(), result.clone());
        }
        if let Some(ref error) = self.error {
            object.insert(
                "error".into(),
                serde_json::json!({ "code": error.code, "message": error.message }),
            );
        }
        Value::Object(object)
    }
}
