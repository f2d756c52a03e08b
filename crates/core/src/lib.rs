//! Core logic of the chat agent: the bounded history, the tool-calling
//! agent loop, tool sets and the tool client contract.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod history;
mod model_client;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentError, AgentRun};
pub use history::{HistoryBuffer, MAX_HISTORY_LENGTH};
