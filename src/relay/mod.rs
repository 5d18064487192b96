//! Bridge relay: the agent-facing front door.
//!
//! Accepts JSON-RPC style requests, maps `execute` calls onto commands via
//! the fixed [`tools`] table, runs them through a [`CommandBackend`] and
//! answers with a response carrying the original request id.
//!
//! Every inbound frame yields exactly one response. Failures of any kind
//! (unparseable frame, unknown method, executor error, transport error) are
//! turned into error responses; nothing a request does stops the relay
//! except the `shutdown` method.

pub mod backend;
pub mod codec;
pub mod tools;
pub mod transport;

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RelayConfig;
use crate::models::rpc::{RpcRequest, RpcResponse};
use crate::{AppError, Result};

pub use backend::CommandBackend;

/// Parameters of the `execute` method.
#[derive(Debug, Deserialize)]
struct ExecuteParams {
    tool: String,
    #[serde(default)]
    parameters: Value,
}

/// Request handler shared by every relay transport.
pub struct BridgeRelay {
    backend: Arc<dyn CommandBackend>,
    config: RelayConfig,
    shutdown: CancellationToken,
}

impl BridgeRelay {
    /// Relay executing commands through `backend`.
    ///
    /// `shutdown` is cancelled when an agent calls the `shutdown` method;
    /// transports serving this relay watch the same token.
    #[must_use]
    pub fn new(backend: Arc<dyn CommandBackend>, config: RelayConfig, shutdown: CancellationToken) -> Self {
        Self {
            backend,
            config,
            shutdown,
        }
    }

    /// Settings the relay was built with.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Whether a `shutdown` request (or the owner) has stopped the relay.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Answer one decoded frame, or the error the codec produced for it.
    ///
    /// A frame that could not be decoded is answered with a `null` id.
    pub async fn handle_frame(&self, frame: Result<Value>) -> RpcResponse {
        let value = match frame {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "rejecting undecodable request");
                return RpcResponse::from_error(Value::Null, &err);
            }
        };

        match RpcRequest::from_value(value) {
            Ok(request) => self.handle_request(request).await,
            Err(response) => {
                warn!(id = %response.id, "rejecting frame that is not a request");
                response
            }
        }
    }

    /// Answer one request.
    pub async fn handle_request(&self, request: RpcRequest) -> RpcResponse {
        let span = info_span!("relay_request", method = %request.method, id = %request.id);

        async move {
            let RpcRequest { id, method, params } = request;
            debug!(params = %params, "request parameters");

            let outcome = match method.as_str() {
                "initialize" => Ok(self.initialize()),
                "execute" => self.execute(params).await,
                "tools/list" => Ok(tools::list()),
                "shutdown" => {
                    info!("shutdown requested by agent");
                    self.shutdown.cancel();
                    Ok(Value::Null)
                }
                other => Err(AppError::MethodNotFound(other.to_owned())),
            };

            match outcome {
                Ok(result) => RpcResponse::success(id, result),
                Err(err) => {
                    warn!(%err, "request failed");
                    RpcResponse::from_error(id, &err)
                }
            }
        }
        .instrument(span)
        .await
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": self.config.protocol_version,
            "serverInfo": {
                "name": self.config.server_name,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": tools::capabilities(),
            },
        })
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let params: ExecuteParams = serde_json::from_value(params)
            .map_err(|err| AppError::InvalidParams(format!("execute expects {{tool, parameters}}: {err}")))?;

        let command = tools::translate(&params.tool, &params.parameters)?;
        info!(tool = %params.tool, command = %command.name(), "relaying tool call");

        let data = self.backend.dispatch(command).await?;
        Ok(json!({
            "type": "tool_response",
            "data": data,
        }))
    }
}
