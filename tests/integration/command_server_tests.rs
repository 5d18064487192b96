//! Integration tests for the command server's accept/read/dispatch loop.
//!
//! Every test drives a real server on an ephemeral loopback port with raw
//! `TcpStream` clients.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use command_bridge::config::ServerConfig;
use command_bridge::executor::SceneExecutor;
use command_bridge::frame::FrameBuffer;

use super::test_helpers::{
    closed_by_peer, flood_without_reading, loopback_server_config, read_frame, read_frame_with, spawn_server,
    spawn_server_with, write_frame, StubExecutor, IO_DEADLINE,
};

/// An `echo` command whose reply carries `bytes` of padding.
fn padded_echo(bytes: usize) -> Value {
    json!({ "type": "echo", "params": { "padding": "x".repeat(bytes) } })
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// A scripted command gets the executor's result back on the same socket.
#[tokio::test]
async fn command_result_is_written_back() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    write_frame(&mut client, &json!({ "type": "get_scene_info", "params": {} })).await;
    let response = read_frame(&mut client).await;

    assert_eq!(response, json!({ "status": "success", "result": { "ok": true } }));
    server.stop().await;
}

/// An unknown command is an error result and the connection stays usable.
#[tokio::test]
async fn unknown_command_keeps_connection_open() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    write_frame(&mut client, &json!({ "type": "frobnicate", "params": {} })).await;
    assert_eq!(
        read_frame(&mut client).await,
        json!({ "status": "error", "message": "Unknown command type: frobnicate" })
    );

    write_frame(&mut client, &json!({ "type": "echo", "params": { "n": 2 } })).await;
    assert_eq!(
        read_frame(&mut client).await,
        json!({ "status": "success", "result": { "n": 2 } })
    );
    server.stop().await;
}

/// A request written in several pieces produces exactly one response.
#[tokio::test]
async fn split_request_is_reassembled() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.set_nodelay(true).unwrap();

    let bytes = serde_json::to_vec(&json!({ "type": "echo", "params": { "text": "in pieces" } })).unwrap();
    for piece in bytes.chunks(5) {
        client.write_all(piece).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(
        read_frame(&mut client).await,
        json!({ "status": "success", "result": { "text": "in pieces" } })
    );
    server.stop().await;
}

/// Two requests in one write are answered in order.
#[tokio::test]
async fn pipelined_requests_are_answered_in_order() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    let mut bytes = serde_json::to_vec(&json!({ "type": "echo", "params": { "seq": 1 } })).unwrap();
    bytes.extend(serde_json::to_vec(&json!({ "type": "echo", "params": { "seq": 2 } })).unwrap());
    client.write_all(&bytes).await.unwrap();

    let mut frames = FrameBuffer::new();
    let first = read_frame_with(&mut client, &mut frames).await;
    let second = read_frame_with(&mut client, &mut frames).await;
    assert_eq!(first["result"]["seq"], 1);
    assert_eq!(second["result"]["seq"], 2);
    server.stop().await;
}

// ── Bad input ────────────────────────────────────────────────────────────────

/// Garbage bytes produce an error result; the next request still works.
#[tokio::test]
async fn malformed_frame_is_reported_and_skipped() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    client.write_all(b"{\"type\": oops}").await.unwrap();
    let response = read_frame(&mut client).await;
    assert_eq!(response["status"], "error");
    assert!(
        response["message"].as_str().unwrap().starts_with("malformed frame"),
        "unexpected message: {response}"
    );

    write_frame(&mut client, &json!({ "type": "get_scene_info" })).await;
    assert_eq!(read_frame(&mut client).await["status"], "success");
    server.stop().await;
}

/// Valid JSON that is not a command is rejected without dropping the peer.
#[tokio::test]
async fn non_command_json_is_rejected() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    write_frame(&mut client, &json!(["not", "a", "command"])).await;
    assert_eq!(read_frame(&mut client).await["status"], "error");

    write_frame(&mut client, &json!({ "params": {} })).await;
    let response = read_frame(&mut client).await;
    assert_eq!(response["status"], "error");
    assert!(response["message"].as_str().unwrap().contains("missing `type`"));
    server.stop().await;
}

// ── Isolation ────────────────────────────────────────────────────────────────

/// A panicking executor becomes an error result and the server survives.
#[tokio::test]
async fn executor_panic_is_contained() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    write_frame(&mut client, &json!({ "type": "panic" })).await;
    assert_eq!(
        read_frame(&mut client).await,
        json!({ "status": "error", "message": "Command panic failed: executor panicked" })
    );

    write_frame(&mut client, &json!({ "type": "get_scene_info" })).await;
    assert_eq!(read_frame(&mut client).await["status"], "success");
    server.stop().await;
}

/// The scene executor behind the server answers the sphere flow.
#[tokio::test]
async fn scene_executor_over_the_wire() {
    let server = spawn_server(Arc::new(SceneExecutor::new())).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    write_frame(
        &mut client,
        &json!({ "type": "create_geometry", "params": { "geo_type": "sphere", "parent_path": "/obj" } }),
    )
    .await;
    let response = read_frame(&mut client).await;
    assert_eq!(response["result"]["path"], "/obj/sphere1");
    server.stop().await;
}

// ── Peers and lifecycle ──────────────────────────────────────────────────────

/// A second connection replaces the first, which is closed.
#[tokio::test]
async fn new_connection_replaces_active_peer() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;

    let mut first = TcpStream::connect(server.addr).await.unwrap();
    write_frame(&mut first, &json!({ "type": "get_scene_info" })).await;
    assert_eq!(read_frame(&mut first).await["status"], "success");

    let mut second = TcpStream::connect(server.addr).await.unwrap();
    write_frame(&mut second, &json!({ "type": "get_scene_info" })).await;
    assert_eq!(read_frame(&mut second).await["status"], "success");

    assert!(closed_by_peer(&mut first).await, "replaced peer must be closed");
    server.stop().await;
}

/// A peer that disconnects mid-frame does not affect the next peer.
#[tokio::test]
async fn disconnect_mid_frame_is_tolerated() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;

    let mut quitter = TcpStream::connect(server.addr).await.unwrap();
    quitter.write_all(b"{\"type\":\"get_sc").await.unwrap();
    drop(quitter);

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    write_frame(&mut client, &json!({ "type": "get_scene_info" })).await;
    assert_eq!(read_frame(&mut client).await["status"], "success");
    server.stop().await;
}

/// Cancelling the token stops the loop and closes the active peer.
#[tokio::test]
async fn cancellation_stops_the_server() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let addr = server.addr;
    let mut client = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut client, &json!({ "type": "get_scene_info" })).await;
    read_frame(&mut client).await;

    server.stop().await;

    assert!(closed_by_peer(&mut client).await, "active peer must be closed on stop");
    let refused = tokio::time::timeout(IO_DEADLINE, TcpStream::connect(addr)).await.unwrap();
    assert!(refused.is_err(), "listener must be gone after stop");
}

// ── Slow peers ───────────────────────────────────────────────────────────────

/// Stopping works while replies are backed up on a peer that never reads.
#[tokio::test]
async fn stop_is_honoured_while_peer_refuses_to_read() {
    let server = spawn_server(Arc::new(StubExecutor::default())).await;
    let staller = TcpStream::connect(server.addr).await.unwrap();
    let flood = flood_without_reading(staller, padded_echo(256 * 1024), 256);

    // Let the replies fill both socket buffers so the server blocks on a write.
    tokio::time::sleep(Duration::from_secs(1)).await;

    server.stop().await;
    tokio::time::timeout(IO_DEADLINE, flood)
        .await
        .expect("stopped server must release the stalled peer")
        .unwrap();
}

/// A peer that never reads is dropped once a reply misses the write
/// deadline, and the next client is served.
#[tokio::test]
async fn stalled_peer_is_dropped_after_write_deadline() {
    let config = ServerConfig {
        write_timeout_seconds: 1,
        ..loopback_server_config()
    };
    let server = spawn_server_with(&config, Arc::new(StubExecutor::default())).await;
    let staller = TcpStream::connect(server.addr).await.unwrap();
    let flood = flood_without_reading(staller, padded_echo(256 * 1024), 256);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    write_frame(&mut client, &json!({ "type": "get_scene_info" })).await;
    assert_eq!(read_frame(&mut client).await["status"], "success");

    tokio::time::timeout(IO_DEADLINE, flood)
        .await
        .expect("stalled peer must be cut off")
        .unwrap();
    server.stop().await;
}
