//! A small Model Context Protocol client for tool servers running as
//! child processes.
//!
//! Only what a chat agent needs is implemented: the `initialize`
//! handshake, `tools/list` and `tools/call` over line-delimited JSON-RPC
//! on the server's stdio.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod client;
mod config;
mod connection;
mod error;
mod protocol;
mod server;
mod tool;

pub use client::McpClient;
pub use config::{McpConfig, ServerConfig};
pub use error::Error;
pub use tool::{DEFAULT_TOOL_TIMEOUT, McpTool};

/// The protocol revision announced during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
