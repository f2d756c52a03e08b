//! A chat agent that runs against a local OpenAI-compatible model and uses
//! tools from MCP servers.
//!
//! The crate has two front-ends: a terminal chat loop (feature `cli`) and
//! a browser chat UI served over WebSocket (feature `web`). Both drive the
//! same [`AgentSession`].

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

#[cfg(feature = "cli")]
pub mod cli;
mod config;
mod error;
mod session;
#[cfg(test)]
mod testing;
#[cfg(feature = "web")]
pub mod web;

pub use config::SessionConfig;
pub use error::{InitializationError, TurnError};
pub use session::{AgentSession, SYSTEM_PROMPT, SessionBuilder, Turn};

/// Re-exports of [`mcp_chat_core`] crate.
pub mod core {
    pub use mcp_chat_core::*;
}
