//! Client side of the command server connection.
//!
//! A [`TransactionChannel`] owns one TCP connection and performs strictly
//! sequential request/response exchanges over it. `send` takes `&mut self`,
//! so a second request cannot be issued while one is pending.
//!
//! Any transport failure (timeout, peer close, framing error) moves the
//! channel to [`ConnectionState::Stale`]: the socket is dropped, because a
//! half-read frame may still be in flight, and every later `send` fails
//! immediately. Reconnecting means building a new channel.

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::frame::FrameBuffer;
use crate::models::command::{Command, CommandResult};
use crate::{AppError, Result};

const READ_CHUNK_BYTES: usize = 8192;

/// Liveness of a channel's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open and framing in sync.
    Connected,
    /// A transport failure occurred; the socket was dropped.
    Stale,
    /// Closed by the owner.
    Closed,
}

/// One connection to the command server.
#[derive(Debug)]
pub struct TransactionChannel {
    stream: Option<TcpStream>,
    state: ConnectionState,
    frames: FrameBuffer,
    timeout: Duration,
    peer: String,
}

impl TransactionChannel {
    /// Open a connection to the command server named in `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unavailable` if the server refuses the connection
    /// or does not accept within `connect_timeout_seconds`.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let address = config.address();
        let stream = match timeout(config.connect_timeout(), TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(AppError::Unavailable(format!(
                    "cannot connect to {address}: {err}"
                )))
            }
            Err(_) => {
                return Err(AppError::Unavailable(format!(
                    "connect to {address} timed out after {}s",
                    config.connect_timeout_seconds
                )))
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            debug!(%err, "failed to set TCP_NODELAY");
        }

        info!(peer = %address, "connected to command server");
        Ok(Self::from_stream(
            stream,
            address,
            config.timeout(),
            config.max_frame_bytes,
        ))
    }

    /// Wrap an already-connected stream.
    #[must_use]
    pub fn from_stream(
        stream: TcpStream,
        peer: impl Into<String>,
        timeout: Duration,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            stream: Some(stream),
            state: ConnectionState::Connected,
            frames: FrameBuffer::with_max_frame_bytes(max_frame_bytes),
            timeout,
            peer: peer.into(),
        }
    }

    /// Current liveness state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the next `send` may succeed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Address this channel was connected to.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write `request` and wait for the matching response frame.
    ///
    /// The deadline covers the write and every read of the exchange.
    ///
    /// # Errors
    ///
    /// - `AppError::ConnectionClosed` if the channel is already stale or
    ///   closed, or the peer closed before any response byte arrived.
    /// - `AppError::Timeout` if no complete frame arrived in time.
    /// - `AppError::IncompleteResponse` if the peer closed mid-frame.
    /// - `AppError::MalformedFrame` / `AppError::FrameTooLarge` on framing
    ///   failure.
    /// - `AppError::Io` on socket errors.
    ///
    /// Every error above leaves the channel stale.
    pub async fn send(&mut self, request: &Value) -> Result<Value> {
        if self.state != ConnectionState::Connected {
            return Err(AppError::ConnectionClosed(format!(
                "connection to {} is {:?}; reconnect before sending",
                self.peer, self.state
            )));
        }

        let Some(stream) = self.stream.as_mut() else {
            return Err(AppError::ConnectionClosed(format!(
                "connection to {} has no socket",
                self.peer
            )));
        };

        let bytes = serde_json::to_vec(request)?;
        debug!(peer = %self.peer, bytes = bytes.len(), "sending request");

        // `timeout` saturates deadlines too far in the future to represent.
        let outcome = timeout(self.timeout, exchange(stream, &mut self.frames, &bytes)).await;

        match outcome {
            Ok(Ok(value)) => {
                if self.frames.has_partial() {
                    warn!(
                        peer = %self.peer,
                        buffered = self.frames.buffered_len(),
                        "unsolicited bytes after response; marking connection stale"
                    );
                    self.invalidate();
                }
                Ok(value)
            }
            Ok(Err(err)) => {
                warn!(peer = %self.peer, %err, "transaction failed; marking connection stale");
                self.invalidate();
                Err(err)
            }
            Err(_) => {
                warn!(peer = %self.peer, timeout_secs = self.timeout.as_secs_f64(), "response deadline elapsed");
                self.invalidate();
                Err(AppError::Timeout(format!(
                    "no response from {} within {:.1}s",
                    self.peer,
                    self.timeout.as_secs_f64()
                )))
            }
        }
    }

    /// Send `command` and decode the reply as a [`CommandResult`].
    ///
    /// # Errors
    ///
    /// Any error of [`send`](Self::send), or `AppError::Protocol` if the
    /// reply is not a result object (the channel is then marked stale).
    pub async fn send_command(&mut self, command: &Command) -> Result<CommandResult> {
        let response = self.send(&command.to_value()).await?;
        CommandResult::from_value(response).inspect_err(|_| self.invalidate())
    }

    /// Send `command` and return its result payload.
    ///
    /// # Errors
    ///
    /// Any error of [`send_command`](Self::send_command), or
    /// `AppError::Executor` when the server replied with an error result.
    pub async fn execute(&mut self, command: &Command) -> Result<Value> {
        self.send_command(command).await?.into_result()
    }

    /// Shut the socket down and mark the channel closed.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                debug!(peer = %self.peer, %err, "socket shutdown failed");
            }
        }
        self.frames.clear();
        self.state = ConnectionState::Closed;
        info!(peer = %self.peer, "connection closed");
    }

    fn invalidate(&mut self) {
        self.stream = None;
        self.frames.clear();
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Stale;
        }
    }
}

/// One write followed by reads until the frame buffer yields a value.
async fn exchange(stream: &mut TcpStream, frames: &mut FrameBuffer, request: &[u8]) -> Result<Value> {
    stream.write_all(request).await?;
    stream.flush().await?;

    let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Err(if frames.has_partial() {
                AppError::IncompleteResponse(format!(
                    "peer closed after {} bytes of a response",
                    frames.buffered_len()
                ))
            } else {
                AppError::ConnectionClosed("peer closed before responding".into())
            });
        }

        if let Some(value) = frames.feed(&chunk[..read])? {
            return Ok(value);
        }
    }
}
