#![forbid(unsafe_code)]

//! JSON command bridge between an agent and a long-running application.
//!
//! The application side runs a [`server::CommandServer`] that executes
//! `{"type", "params"}` commands read from a delimiter-less JSON stream.
//! The agent side runs a [`relay::BridgeRelay`] that turns JSON-RPC tool
//! calls into commands and forwards them over one persistent
//! [`channel::TransactionChannel`] held by a
//! [`supervisor::ConnectionSupervisor`].

pub mod channel;
pub mod config;
pub mod errors;
pub mod executor;
pub mod frame;
pub mod models;
pub mod relay;
pub mod server;
pub mod supervisor;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
