use mcp_chat_core::AgentError;
use mcp_chat_core::tool::ToolClientError;

/// Failure to set up an [`AgentSession`](crate::AgentSession). Fatal to
/// the session.
#[derive(Debug, thiserror::Error)]
pub enum InitializationError {
    /// The tool server definitions could not be loaded.
    #[error("cannot load tool servers: {0}")]
    Config(#[from] mcp_chat_mcp::Error),
    /// The tool client failed to start.
    #[error("cannot start tool servers: {0}")]
    ToolClient(#[source] ToolClientError),
}

/// Failure of a single turn. The conversation can go on.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct TurnError(#[from] AgentError);

impl TurnError {
    /// Returns the underlying agent error.
    #[inline]
    pub fn agent_error(&self) -> &AgentError {
        &self.0
    }
}
