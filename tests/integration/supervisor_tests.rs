//! Integration tests for the connection supervisor's probe and reconnect
//! behaviour against a live command server.

use std::sync::Arc;

use serde_json::json;
use tokio::net::TcpStream;

use command_bridge::models::command::Command;
use command_bridge::relay::CommandBackend;
use command_bridge::supervisor::ConnectionSupervisor;
use command_bridge::AppError;

use super::test_helpers::{client_config, closed_port, read_frame, spawn_server, write_frame, StubExecutor};

fn echo(n: i64) -> Command {
    let mut params = serde_json::Map::new();
    params.insert("n".into(), json!(n));
    Command::new("echo", params)
}

/// The first acquire connects without probing; later ones probe first.
#[tokio::test]
async fn connects_lazily_and_probes_on_reuse() {
    let executor = Arc::new(StubExecutor::default());
    let server = spawn_server(Arc::clone(&executor) as _).await;
    let supervisor = ConnectionSupervisor::new(client_config(server.addr));

    assert!(!supervisor.is_connected().await, "no connection before first use");

    let out = supervisor.acquire().await.unwrap().execute(&echo(1)).await.unwrap();
    assert_eq!(out, json!({ "n": 1 }));
    assert_eq!(executor.probes(), 0, "a fresh connection is not probed");
    assert!(supervisor.is_connected().await);

    let out = supervisor.acquire().await.unwrap().execute(&echo(2)).await.unwrap();
    assert_eq!(out, json!({ "n": 2 }));
    assert_eq!(executor.probes(), 1, "a reused connection is probed once");

    supervisor.shutdown().await;
    assert!(!supervisor.is_connected().await);
    server.stop().await;
}

/// A connection the server dropped fails its probe and is replaced.
#[tokio::test]
async fn reconnects_after_probe_failure() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let supervisor = ConnectionSupervisor::new(client_config(server.addr));

    supervisor.acquire().await.unwrap().execute(&echo(1)).await.unwrap();

    // Another client takes over the server, which drops the supervisor's socket.
    let mut intruder = TcpStream::connect(server.addr).await.unwrap();
    write_frame(&mut intruder, &json!({ "type": "get_scene_info" })).await;
    assert_eq!(read_frame(&mut intruder).await["status"], "success");

    let out = supervisor.acquire().await.unwrap().execute(&echo(2)).await.unwrap();
    assert_eq!(out, json!({ "n": 2 }));
    server.stop().await;
}

/// Nothing listening surfaces as unavailable.
#[tokio::test]
async fn unreachable_server_is_unavailable() {
    let supervisor = ConnectionSupervisor::new(client_config(closed_port().await));

    let err = supervisor.acquire().await.err().expect("acquire must fail");
    assert!(matches!(err, AppError::Unavailable(_)), "got {err:?}");
    assert!(!supervisor.is_connected().await);
}

/// A domain error leaves the connection in place.
#[tokio::test]
async fn executor_error_keeps_connection() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let supervisor = ConnectionSupervisor::new(client_config(server.addr));

    let err = supervisor
        .acquire()
        .await
        .unwrap()
        .execute(&Command::bare("frobnicate"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Executor(ref msg) if msg == "Unknown command type: frobnicate"));
    assert!(supervisor.is_connected().await);
    server.stop().await;
}

/// A timed-out request discards the connection.
#[tokio::test]
async fn timeout_discards_connection() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let mut config = client_config(server.addr);
    config.timeout_seconds = 1;
    let supervisor = ConnectionSupervisor::new(config);

    let mut params = serde_json::Map::new();
    params.insert("ms".into(), json!(1500));
    let err = supervisor
        .acquire()
        .await
        .unwrap()
        .execute(&Command::new("sleep", params))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Timeout(_)), "got {err:?}");
    assert!(!supervisor.is_connected().await, "timed-out connection must be dropped");

    // The next caller gets a fresh, working connection.
    let out = supervisor.acquire().await.unwrap().execute(&echo(3)).await.unwrap();
    assert_eq!(out, json!({ "n": 3 }));
    server.stop().await;
}

/// Explicit invalidation forces a new connection.
#[tokio::test]
async fn invalidate_drops_connection() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let supervisor = ConnectionSupervisor::new(client_config(server.addr));

    supervisor.acquire().await.unwrap().execute(&echo(1)).await.unwrap();
    supervisor.invalidate().await;
    assert!(!supervisor.is_connected().await);

    supervisor.acquire().await.unwrap().invalidate();
    assert!(!supervisor.is_connected().await);
    server.stop().await;
}

/// The supervisor serves as the relay's backend.
#[tokio::test]
async fn supervisor_is_a_command_backend() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let backend: Arc<dyn CommandBackend> = Arc::new(ConnectionSupervisor::new(client_config(server.addr)));

    let out = backend.dispatch(echo(5)).await.unwrap();
    assert_eq!(out, json!({ "n": 5 }));
    server.stop().await;
}
