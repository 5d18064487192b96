//! Owner of the relay's persistent command server connection.
//!
//! The supervisor holds zero or one [`TransactionChannel`]. Callers borrow
//! it through [`ConnectionSupervisor::acquire`], which probes a reused
//! connection with a cheap command and reconnects when the probe fails.
//! The returned [`ChannelLease`] keeps the connection locked for the
//! duration of one request, so concurrent relay connections are served
//! strictly one at a time.

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, info_span, warn, Instrument};

use crate::channel::TransactionChannel;
use crate::config::ClientConfig;
use crate::models::command::Command;
use crate::{AppError, Result};

/// Process-wide holder of the client connection.
pub struct ConnectionSupervisor {
    config: ClientConfig,
    slot: Mutex<Option<TransactionChannel>>,
}

/// Exclusive access to the live connection for one request.
///
/// A transport failure observed through the lease discards the connection
/// so the next [`ConnectionSupervisor::acquire`] reconnects.
pub struct ChannelLease<'a> {
    guard: MutexGuard<'a, Option<TransactionChannel>>,
}

impl ConnectionSupervisor {
    /// Supervisor that connects lazily using `config`.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(None),
        }
    }

    /// Client settings in use.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Return a validated connection, reconnecting if needed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unavailable` if no connection could be made.
    pub async fn acquire(&self) -> Result<ChannelLease<'_>> {
        let span = info_span!("acquire_connection", server = %self.config.address());
        async move {
            let mut guard = self.slot.lock().await;

            if let Some(channel) = guard.as_mut() {
                let probe = Command::bare(self.config.probe_command.clone());
                match channel.send_command(&probe).await {
                    Ok(_) => return Ok(ChannelLease { guard }),
                    Err(err) => {
                        warn!(%err, "existing connection failed liveness probe");
                        channel.close().await;
                        *guard = None;
                    }
                }
            }

            let channel = TransactionChannel::connect(&self.config)
                .await
                .map_err(|err| match err {
                    AppError::Unavailable(msg) => AppError::Unavailable(msg),
                    other => AppError::Unavailable(other.to_string()),
                })?;
            info!("created new persistent connection");
            *guard = Some(channel);
            Ok(ChannelLease { guard })
        }
        .instrument(span)
        .await
    }

    /// Drop the current connection, if any, without closing it gracefully.
    pub async fn invalidate(&self) {
        if self.slot.lock().await.take().is_some() {
            info!("connection invalidated");
        }
    }

    /// Close the current connection, if any.
    pub async fn shutdown(&self) {
        if let Some(mut channel) = self.slot.lock().await.take() {
            channel.close().await;
        }
    }

    /// Whether a connection is currently held and not known to be stale.
    pub async fn is_connected(&self) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .is_some_and(TransactionChannel::is_connected)
    }
}

impl ChannelLease<'_> {
    /// Execute `command` on the leased connection.
    ///
    /// # Errors
    ///
    /// Any error of [`TransactionChannel::execute`]. Transport errors also
    /// discard the connection.
    pub async fn execute(&mut self, command: &Command) -> Result<Value> {
        let Some(channel) = self.guard.as_mut() else {
            return Err(AppError::Unavailable("connection was discarded".into()));
        };

        let result = channel.execute(command).await;
        if let Err(ref err) = result {
            if err.is_transport() {
                warn!(%err, "discarding connection after transport failure");
                *self.guard = None;
            }
        }
        result
    }

    /// Discard the leased connection.
    pub fn invalidate(mut self) {
        *self.guard = None;
    }
}
