//! Seam between the relay and whatever executes its commands.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::models::command::Command;
use crate::supervisor::ConnectionSupervisor;
use crate::Result;

/// Executes commands on behalf of the relay.
///
/// Production code uses [`ConnectionSupervisor`]; tests substitute an
/// in-process fake.
pub trait CommandBackend: Send + Sync {
    /// Execute `command` and return its result payload.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Executor`](crate::AppError::Executor) for error
    /// results, [`AppError::Unavailable`](crate::AppError::Unavailable)
    /// when the command server cannot be reached, and transport errors
    /// otherwise.
    fn dispatch(&self, command: Command) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>>;
}

impl CommandBackend for ConnectionSupervisor {
    fn dispatch(&self, command: Command) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        Box::pin(async move {
            let mut lease = self.acquire().await?;
            lease.execute(&command).await
        })
    }
}
