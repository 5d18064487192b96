//! Unit tests for relay method dispatch against an in-process backend.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use command_bridge::config::RelayConfig;
use command_bridge::models::command::Command;
use command_bridge::models::rpc::{
    RpcRequest, EXECUTOR_ERROR, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use command_bridge::relay::{BridgeRelay, CommandBackend};
use command_bridge::{AppError, Result};

/// Backend answering every command with a scripted outcome and recording
/// what it was asked to run.
struct ScriptedBackend {
    seen: Mutex<Vec<Command>>,
    reply: fn(&Command) -> Result<Value>,
}

impl ScriptedBackend {
    fn new(reply: fn(&Command) -> Result<Value>) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            reply,
        })
    }

    fn seen(&self) -> Vec<Command> {
        self.seen.lock().unwrap().clone()
    }
}

impl CommandBackend for ScriptedBackend {
    fn dispatch(&self, command: Command) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        let outcome = (self.reply)(&command);
        self.seen.lock().unwrap().push(command);
        Box::pin(async move { outcome })
    }
}

fn relay_with(backend: Arc<ScriptedBackend>) -> (BridgeRelay, CancellationToken) {
    let ct = CancellationToken::new();
    let relay = BridgeRelay::new(backend, RelayConfig::default(), ct.clone());
    (relay, ct)
}

fn request(value: Value) -> RpcRequest {
    RpcRequest::from_value(value).expect("test request must be valid")
}

#[tokio::test]
async fn execute_create_sphere_returns_path_with_request_id() {
    let backend = ScriptedBackend::new(|_| Ok(json!({ "path": "/obj/sphere1" })));
    let (relay, _) = relay_with(Arc::clone(&backend));

    let response = relay
        .handle_request(request(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "execute",
            "params": { "tool": "create_sphere", "parameters": {} },
        })))
        .await;

    assert_eq!(
        response.to_value(),
        json!({
            "jsonrpc": "2.0",
            "id": 7,
            "result": { "type": "tool_response", "data": { "path": "/obj/sphere1" } },
        })
    );

    let seen = backend.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].name(), "create_geometry");
    assert_eq!(seen[0].params()["geo_type"], "sphere");
}

#[tokio::test]
async fn initialize_does_not_touch_the_backend() {
    let backend = ScriptedBackend::new(|_| Ok(Value::Null));
    let (relay, _) = relay_with(Arc::clone(&backend));

    let response = relay
        .handle_request(request(json!({ "id": "init", "method": "initialize" })))
        .await;
    let result = response.result.expect("initialize succeeds");

    assert_eq!(response.id, json!("init"));
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "command-bridge");
    assert_eq!(result["serverInfo"]["version"], env!("CARGO_PKG_VERSION"));
    assert!(result["capabilities"]["tools"]["create_sphere"].is_object());
    assert!(backend.seen().is_empty());
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let (relay, _) = relay_with(ScriptedBackend::new(|_| Ok(Value::Null)));

    let response = relay
        .handle_request(request(json!({ "id": 3, "method": "resources/list" })))
        .await;
    let error = response.error.expect("error response");

    assert_eq!(response.id, json!(3));
    assert_eq!(error.code, METHOD_NOT_FOUND);
    assert_eq!(error.message, "Method not found: resources/list");
}

#[tokio::test]
async fn executor_failure_is_correlated() {
    let backend = ScriptedBackend::new(|_| Err(AppError::Executor("Node not found: /obj/x".into())));
    let (relay, _) = relay_with(backend);

    let response = relay
        .handle_request(request(json!({
            "id": 11,
            "method": "execute",
            "params": { "tool": "get_node_info", "parameters": { "path": "/obj/x" } },
        })))
        .await;
    let error = response.error.expect("error response");

    assert_eq!(response.id, json!(11));
    assert_eq!(error.code, EXECUTOR_ERROR);
    assert_eq!(error.message, "Node not found: /obj/x");
}

#[tokio::test]
async fn transport_failure_is_internal_error() {
    let backend = ScriptedBackend::new(|_| Err(AppError::Timeout("no response".into())));
    let (relay, _) = relay_with(backend);

    let response = relay
        .handle_request(request(json!({
            "id": 12,
            "method": "execute",
            "params": { "tool": "get_scene_info" },
        })))
        .await;

    assert_eq!(response.error.expect("error response").code, INTERNAL_ERROR);
}

#[tokio::test]
async fn bad_execute_params_never_reach_the_backend() {
    let backend = ScriptedBackend::new(|_| Ok(Value::Null));
    let (relay, _) = relay_with(Arc::clone(&backend));

    for params in [
        json!({ "parameters": {} }),
        json!({ "tool": "no_such_tool" }),
        json!({ "tool": "delete_node", "parameters": {} }),
    ] {
        let response = relay
            .handle_request(request(json!({ "id": 1, "method": "execute", "params": params })))
            .await;
        assert_eq!(response.error.expect("error response").code, INVALID_PARAMS);
    }
    assert!(backend.seen().is_empty());
}

#[tokio::test]
async fn undecodable_frame_gets_null_id() {
    let (relay, _) = relay_with(ScriptedBackend::new(|_| Ok(Value::Null)));

    let response = relay
        .handle_frame(Err(AppError::MalformedFrame("expected value".into())))
        .await;

    assert_eq!(response.id, Value::Null);
    assert_eq!(response.error.expect("error response").code, PARSE_ERROR);
}

#[tokio::test]
async fn non_request_frame_is_invalid_request() {
    let (relay, _) = relay_with(ScriptedBackend::new(|_| Ok(Value::Null)));

    let response = relay.handle_frame(Ok(json!({ "id": 5, "params": {} }))).await;

    assert_eq!(response.id, json!(5));
    assert_eq!(response.error.expect("error response").code, INVALID_REQUEST);
}

#[tokio::test]
async fn shutdown_replies_then_cancels() {
    let (relay, ct) = relay_with(ScriptedBackend::new(|_| Ok(Value::Null)));

    let response = relay
        .handle_request(request(json!({ "id": 99, "method": "shutdown" })))
        .await;

    assert_eq!(response.to_value(), json!({ "jsonrpc": "2.0", "id": 99, "result": null }));
    assert!(ct.is_cancelled());
    assert!(relay.is_shutting_down());
}

#[tokio::test]
async fn tools_list_matches_table() {
    let (relay, _) = relay_with(ScriptedBackend::new(|_| Ok(Value::Null)));

    let response = relay
        .handle_request(request(json!({ "id": 2, "method": "tools/list" })))
        .await;

    assert_eq!(response.result.expect("tools/list succeeds"), command_bridge::relay::tools::list());
}
