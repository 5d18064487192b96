//! Wire-level data model shared by the server, channel, and relay.

pub mod command;
pub mod rpc;
