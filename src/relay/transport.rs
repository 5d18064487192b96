//! Transports the relay accepts agent requests on.
//!
//! TCP connections use the delimiter-less [`JsonFrameCodec`] and are served
//! concurrently, one task each; the supervisor's lock keeps their backend
//! traffic strictly sequential. The stdio transport reads newline-delimited
//! JSON from stdin and writes responses to stdout, so logs must go to
//! stderr when it is in use.
//!
//! Within one connection a request is fully answered before the next one
//! is decoded. An agent that stops reading its responses is disconnected
//! once a write has been stalled for `relay.write_timeout_seconds`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use super::codec::LineCodec;
use super::BridgeRelay;
use crate::config::RelayConfig;
use crate::frame::JsonFrameCodec;
use crate::models::rpc::RpcResponse;
use crate::{AppError, Result};

const READ_CHUNK_BYTES: usize = 8192;

/// Bind the relay's TCP listener.
///
/// # Errors
///
/// Returns `AppError::Io` if the address cannot be bound.
pub async fn bind_tcp(config: &RelayConfig) -> Result<TcpListener> {
    let address = format!("{}:{}", config.host, config.port);
    TcpListener::bind(&address)
        .await
        .map_err(|err| AppError::Io(format!("failed to bind relay on {address}: {err}")))
}

/// Accept agent connections on `listener` until `ct` is cancelled.
///
/// Waits for open connections to finish their current request before
/// returning.
pub async fn serve_tcp(relay: Arc<BridgeRelay>, listener: TcpListener, ct: CancellationToken) {
    let local = listener
        .local_addr()
        .map_or_else(|_| "unknown".to_owned(), |addr| addr.to_string());
    let span = info_span!("relay_tcp", addr = %local);

    async move {
        info!("relay listening");
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                biased;

                () = ct.cancelled() => {
                    info!("relay shutting down");
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            tracker.spawn(serve_tcp_connection(Arc::clone(&relay), stream, addr, ct.clone()));
                        }
                        Err(err) => {
                            warn!(%err, "relay accept failed");
                        }
                    }
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        info!("relay stopped");
    }
    .instrument(span)
    .await;
}

async fn serve_tcp_connection(relay: Arc<BridgeRelay>, stream: TcpStream, addr: SocketAddr, ct: CancellationToken) {
    let span = info_span!("relay_connection", peer = %addr);

    async move {
        info!("agent connected");
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%err, "failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        match serve_connection(&relay, reader, writer, JsonFrameCodec::new(), &ct).await {
            Ok(()) => info!("agent disconnected"),
            Err(err) => warn!(%err, "agent connection failed"),
        }
    }
    .instrument(span)
    .await;
}

/// Serve the relay over stdin/stdout until EOF or cancellation.
///
/// # Errors
///
/// Returns `AppError::Io` if stdout cannot be written.
pub async fn serve_stdio(relay: Arc<BridgeRelay>, ct: CancellationToken) -> Result<()> {
    info!("starting stdio relay transport");
    let result = serve_connection(&relay, tokio::io::stdin(), tokio::io::stdout(), LineCodec::new(), &ct)
        .instrument(info_span!("relay_stdio"))
        .await;
    info!("stdio relay transport shut down");
    result
}

/// Answer every request arriving on `reader`, in order, on `writer`.
///
/// Returns when the reader reaches EOF, when `ct` is cancelled, or after
/// answering a request that cancelled it. Decode errors are answered with
/// an error response and the connection stays open.
///
/// # Errors
///
/// - `AppError::Io` if reading or writing fails.
/// - `AppError::Timeout` if a response could not be written within the
///   relay's write deadline.
pub async fn serve_connection<R, W, C>(
    relay: &BridgeRelay,
    mut reader: R,
    mut writer: W,
    mut codec: C,
    ct: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    C: Decoder<Item = Value, Error = AppError> + Encoder<Value, Error = AppError>,
{
    let deadline = relay.config().write_timeout();
    let mut inbound = BytesMut::with_capacity(READ_CHUNK_BYTES);

    loop {
        loop {
            let Some(frame) = codec.decode(&mut inbound).transpose() else {
                break;
            };
            let response = relay.handle_frame(frame).await;
            let delivery = deliver(&mut writer, &mut codec, &response, deadline, ct).await?;
            if matches!(delivery, Delivery::Cancelled) || ct.is_cancelled() {
                return Ok(());
            }
        }

        inbound.reserve(READ_CHUNK_BYTES);
        let read = tokio::select! {
            biased;

            () = ct.cancelled() => return Ok(()),
            read = reader.read_buf(&mut inbound) => read?,
        };

        if read == 0 {
            return drain_at_eof(relay, &mut writer, &mut codec, &mut inbound, deadline, ct).await;
        }
    }
}

/// Answer whatever the codec can still make of the buffer once input ended.
async fn drain_at_eof<W, C>(
    relay: &BridgeRelay,
    writer: &mut W,
    codec: &mut C,
    inbound: &mut BytesMut,
    deadline: Duration,
    ct: &CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    C: Decoder<Item = Value, Error = AppError> + Encoder<Value, Error = AppError>,
{
    loop {
        match codec.decode_eof(inbound) {
            Ok(None) => return Ok(()),
            Ok(Some(value)) => {
                let response = relay.handle_frame(Ok(value)).await;
                if matches!(deliver(writer, codec, &response, deadline, ct).await?, Delivery::Cancelled) {
                    return Ok(());
                }
            }
            Err(err) => {
                let response = relay.handle_frame(Err(err)).await;
                // The agent may already have closed its read side.
                if let Err(err) = deliver(writer, codec, &response, deadline, ct).await {
                    debug!(%err, "could not deliver final error response");
                }
                return Ok(());
            }
        }
    }
}

/// Whether a response reached the writer.
enum Delivery {
    Sent,
    Cancelled,
}

/// Write one response, giving up after `deadline` or when `ct` fires.
///
/// The write is polled first so a response that fits the transport's
/// buffer (the reply to `shutdown` included) still goes out.
async fn deliver<W, C>(
    writer: &mut W,
    codec: &mut C,
    response: &RpcResponse,
    deadline: Duration,
    ct: &CancellationToken,
) -> Result<Delivery>
where
    W: AsyncWrite + Unpin,
    C: Encoder<Value, Error = AppError>,
{
    let mut out = BytesMut::new();
    codec.encode(response.to_value(), &mut out)?;

    tokio::select! {
        biased;

        written = tokio::time::timeout(deadline, write_all_flushed(writer, &out)) => match written {
            Ok(result) => result.map(|()| Delivery::Sent),
            Err(_) => Err(AppError::Timeout(format!(
                "agent did not read a response within {}s",
                deadline.as_secs()
            ))),
        },
        () = ct.cancelled() => {
            debug!("abandoning response write on shutdown");
            Ok(Delivery::Cancelled)
        }
    }
}

async fn write_all_flushed<W>(writer: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}
