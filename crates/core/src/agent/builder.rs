use std::time::Duration;

use mcp_chat_model::ModelProvider;

use super::{Agent, DEFAULT_MAX_REQUESTS};
use crate::model_client::ModelClient;
use crate::tool::{Tool, ToolSet};

/// [`Agent`] builder.
pub struct AgentBuilder {
    model_client: ModelClient,
    system_prompt: Option<String>,
    tools: ToolSet,
    max_requests: usize,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            system_prompt: None,
            tools: ToolSet::new(),
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }

    /// Sets the system prompt sent in front of every request.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.add(tool);
        self
    }

    /// Registers every tool of `tools`.
    #[inline]
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools.merge(tools);
        self
    }

    /// Limits the model requests of one turn.
    #[inline]
    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests.max(1);
        self
    }

    /// Limits how long rate-limited requests are retried.
    #[inline]
    pub fn with_max_retry_time(mut self, max_retry_time: Duration) -> Self {
        self.model_client.set_max_retry_time(max_retry_time);
        self
    }

    /// Builds the agent.
    pub fn build(self) -> Agent {
        let Self {
            model_client,
            system_prompt,
            tools,
            max_requests,
        } = self;
        debug!("building an agent with tools {tools:?}");
        Agent {
            model_client,
            system_prompt,
            tools,
            max_requests,
        }
    }
}
