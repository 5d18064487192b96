//! Application-side command server.
//!
//! Listens on TCP (default `localhost:9877`) and serves one peer at a time.
//! Each complete frame is decoded as a [`Command`], executed on the blocking
//! pool through the configured [`CommandExecutor`], and answered on the same
//! connection.
//!
//! ## Peer replacement
//!
//! A new inbound connection replaces the active peer. The old socket is
//! dropped together with any partial frame it had buffered. A command
//! already executing runs to completion and its result is written to the
//! peer it came from before the replacement is observed.
//!
//! ## Slow peers
//!
//! A reply that cannot be written within `write_timeout_seconds` drops the
//! peer. Cancellation is honoured while a command runs or a reply is
//! blocked on a peer that is not reading.
//!
//! ## Isolation
//!
//! Executor errors and panics become `{"status":"error"}` results. Nothing a
//! peer sends or an executor does terminates the service loop; only the
//! cancellation token does.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::executor::CommandExecutor;
use crate::frame::FrameBuffer;
use crate::models::command::{Command, CommandResult};
use crate::{AppError, Result};

/// The currently connected client.
struct Peer {
    id: Uuid,
    addr: SocketAddr,
    stream: TcpStream,
    frames: FrameBuffer,
}

/// What the loop should do with the active peer after handling an event.
enum PeerAction {
    Keep,
    Drop,
}

/// Bound command server, ready to run.
pub struct CommandServer {
    listener: TcpListener,
    executor: Arc<dyn CommandExecutor>,
    max_frame_bytes: usize,
    read_chunk_bytes: usize,
    write_timeout: Duration,
}

impl CommandServer {
    /// Bind the listener described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the address cannot be bound.
    pub async fn bind(config: &ServerConfig, executor: Arc<dyn CommandExecutor>) -> Result<Self> {
        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|err| AppError::Io(format!("failed to bind command server on {address}: {err}")))?;

        Ok(Self {
            listener,
            executor,
            max_frame_bytes: config.max_frame_bytes,
            read_chunk_bytes: config.read_chunk_bytes,
            write_timeout: config.write_timeout(),
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the service loop on a background task until `ct` is cancelled.
    #[must_use]
    pub fn spawn(self, ct: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(ct))
    }

    /// Run the service loop on the current task until `ct` is cancelled.
    pub async fn run(self, ct: CancellationToken) {
        let local = self
            .listener
            .local_addr()
            .map_or_else(|_| "unknown".to_owned(), |addr| addr.to_string());
        let span = info_span!("command_server", addr = %local);

        async move {
            info!("command server listening");
            let mut peer: Option<Peer> = None;
            let mut chunk = vec![0_u8; self.read_chunk_bytes];

            loop {
                tokio::select! {
                    biased;

                    () = ct.cancelled() => {
                        info!("command server shutting down");
                        break;
                    }

                    accepted = self.listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                if let Some(old) = peer.take() {
                                    warn!(
                                        old_peer = %old.addr,
                                        new_peer = %addr,
                                        discarded_bytes = old.frames.buffered_len(),
                                        "new connection replaces active peer"
                                    );
                                }
                                if let Err(err) = stream.set_nodelay(true) {
                                    debug!(%err, "failed to set TCP_NODELAY");
                                }
                                let id = Uuid::new_v4();
                                info!(peer = %addr, peer_id = %id, "peer connected");
                                peer = Some(Peer {
                                    id,
                                    addr,
                                    stream,
                                    frames: FrameBuffer::with_max_frame_bytes(self.max_frame_bytes),
                                });
                            }
                            Err(err) => {
                                warn!(%err, "accept failed");
                            }
                        }
                    }

                    read = read_peer(&mut peer, &mut chunk) => {
                        let Some(active) = peer.as_mut() else {
                            continue;
                        };
                        let action = match read {
                            Ok(0) => on_disconnect(active),
                            Ok(n) => self.on_bytes(active, &chunk[..n], &ct).await,
                            Err(err) => {
                                warn!(peer = %active.addr, %err, "peer read failed");
                                PeerAction::Drop
                            }
                        };
                        if matches!(action, PeerAction::Drop) {
                            peer = None;
                        }
                    }
                }
            }

            if let Some(mut active) = peer.take() {
                if let Err(err) = active.stream.shutdown().await {
                    debug!(%err, "peer shutdown failed");
                }
            }
            info!("command server stopped");
        }
        .instrument(span)
        .await;
    }

    /// Feed received bytes and answer every complete frame they finish.
    ///
    /// Gives up on the peer when `ct` is cancelled mid-command or mid-write,
    /// and when a reply cannot be written within the write deadline.
    async fn on_bytes(&self, peer: &mut Peer, bytes: &[u8], ct: &CancellationToken) -> PeerAction {
        let span = info_span!("peer", peer_id = %peer.id);
        let mut next = peer.frames.feed(bytes);

        loop {
            let result = match next {
                Ok(None) => return PeerAction::Keep,
                Ok(Some(frame)) => {
                    tokio::select! {
                        biased;

                        () = ct.cancelled() => {
                            info!(parent: &span, "abandoning command on shutdown");
                            return PeerAction::Drop;
                        }
                        result = self.dispatch(frame).instrument(span.clone()) => result,
                    }
                }
                Err(err) => {
                    warn!(parent: &span, %err, "discarding malformed frame");
                    CommandResult::error(err.to_string())
                }
            };

            // The write is polled first so a reply that fits the socket
            // buffer still goes out after cancellation.
            let written = tokio::select! {
                biased;

                written = tokio::time::timeout(self.write_timeout, write_result(&mut peer.stream, &result)) => written,
                () = ct.cancelled() => {
                    info!(parent: &span, "dropping peer blocked on write at shutdown");
                    return PeerAction::Drop;
                }
            };

            match written {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(parent: &span, %err, "failed to write response");
                    return PeerAction::Drop;
                }
                Err(_) => {
                    warn!(
                        parent: &span,
                        timeout_secs = self.write_timeout.as_secs(),
                        "peer is not reading responses; dropping it"
                    );
                    return PeerAction::Drop;
                }
            }

            next = peer.frames.next_frame();
        }
    }

    /// Decode one frame and run it through the executor.
    async fn dispatch(&self, frame: Value) -> CommandResult {
        let command = match Command::from_value(frame) {
            Ok(command) => command,
            Err(err) => {
                warn!(%err, "rejecting frame that is not a command");
                return CommandResult::error(err.to_string());
            }
        };

        let (name, params) = command.into_parts();
        info!(command = %name, "executing command");
        let logged_params = Value::Object(params.clone());
        debug!(command = %name, params = %logged_params, "command parameters");

        let executor = Arc::clone(&self.executor);
        let task_name = name.clone();
        let outcome = tokio::task::spawn_blocking(move || executor.execute(&task_name, params)).await;

        match outcome {
            Ok(Ok(result)) => {
                debug!(command = %name, "command succeeded");
                CommandResult::success(result)
            }
            Ok(Err(err)) => {
                info!(command = %name, error = %err, "command failed");
                CommandResult::error(err.message())
            }
            Err(join_err) => {
                error!(command = %name, error = %join_err, "executor panicked");
                CommandResult::error(format!("Command {name} failed: executor panicked"))
            }
        }
    }
}

/// Read from the active peer, or park forever when there is none.
async fn read_peer(peer: &mut Option<Peer>, chunk: &mut [u8]) -> std::io::Result<usize> {
    match peer {
        Some(active) => active.stream.read(chunk).await,
        None => std::future::pending().await,
    }
}

fn on_disconnect(peer: &Peer) -> PeerAction {
    if peer.frames.has_partial() {
        warn!(
            peer = %peer.addr,
            discarded_bytes = peer.frames.buffered_len(),
            "peer closed mid-message"
        );
    } else {
        info!(peer = %peer.addr, "peer disconnected");
    }
    PeerAction::Drop
}

async fn write_result(stream: &mut TcpStream, result: &CommandResult) -> Result<()> {
    let bytes = serde_json::to_vec(&result.to_value())?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}
