use mcp_chat_core::tool::{ToolClient, ToolSet};
use mcp_chat_core::{Agent, AgentBuilder, HistoryBuffer};
use mcp_chat_mcp::McpClient;
use mcp_chat_model::ModelProvider;
use mcp_chat_openai_model::OpenAIProvider;
use tokio::sync::Mutex;

use crate::{InitializationError, SessionConfig, TurnError};

/// The system prompt of every session.
pub const SYSTEM_PROMPT: &str = include_str!("./system_prompt.md");

/// A session builder.
///
/// See [`AgentSession`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    system_prompt: String,
    tool_client: Option<Box<dyn ToolClient>>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        Self {
            agent_builder: AgentBuilder::with_model_provider(provider),
            system_prompt: SYSTEM_PROMPT.to_owned(),
            tool_client: None,
        }
    }

    /// Replaces the default system prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the client providing the session's tools.
    #[inline]
    pub fn with_tool_client(
        mut self,
        client: impl ToolClient + 'static,
    ) -> Self {
        self.tool_client = Some(Box::new(client));
        self
    }

    /// Applies further agent settings.
    #[inline]
    pub fn configure_agent(
        mut self,
        configure: impl FnOnce(AgentBuilder) -> AgentBuilder,
    ) -> Self {
        self.agent_builder = configure(self.agent_builder);
        self
    }

    /// Starts the tool client and builds the session.
    ///
    /// If the client fails to start it is cleaned up before the error is
    /// returned.
    pub async fn build(self) -> Result<AgentSession, InitializationError> {
        let Self {
            agent_builder,
            system_prompt,
            mut tool_client,
        } = self;

        let tools = match tool_client.as_mut() {
            Some(client) => match client.start().await {
                Ok(tools) => tools,
                Err(err) => {
                    if let Err(cleanup_err) = client.cleanup().await {
                        warn!("cleanup after failed start: {cleanup_err}");
                    }
                    return Err(InitializationError::ToolClient(err));
                }
            },
            None => ToolSet::new(),
        };
        info!("session tools: {tools:?}");

        let agent = agent_builder
            .with_system_prompt(system_prompt)
            .with_tools(tools)
            .build();
        Ok(AgentSession {
            agent,
            tool_client: Mutex::new(tool_client),
        })
    }
}

/// The result of [`AgentSession::submit`].
#[derive(Clone, Debug, PartialEq)]
pub struct Turn {
    /// The agent's final answer.
    pub response: String,
    /// The prior history followed by every message of this turn. Not
    /// trimmed.
    pub history: HistoryBuffer,
}

/// An agent bound to the tool client that supplies its tools.
///
/// Call [`AgentSession::cleanup`] when the session ends. It is safe to
/// call more than once; only the first call releases the tool client.
pub struct AgentSession {
    agent: Agent,
    tool_client: Mutex<Option<Box<dyn ToolClient>>>,
}

impl AgentSession {
    /// Builds a session from the process configuration: the OpenAI
    /// compatible endpoint plus the MCP servers listed in the config file.
    pub async fn initialize(
        config: &SessionConfig,
    ) -> Result<Self, InitializationError> {
        let mut client = McpClient::new();
        client.load_servers(&config.mcp_config)?;
        info!(
            "using model {} at {}, servers from {}",
            config.model,
            config.base_url,
            config.mcp_config.display()
        );
        SessionBuilder::with_model_provider(OpenAIProvider::new(
            config.openai_config(),
        ))
        .with_tool_client(client)
        .build()
        .await
    }

    /// Returns the agent of this session.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Runs one turn. `history` itself is never modified.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. A cancelled turn leaves no trace.
    pub async fn submit(
        &self,
        text: &str,
        history: &HistoryBuffer,
    ) -> Result<Turn, TurnError> {
        let run = self.agent.run(text, history.messages()).await?;
        Ok(Turn {
            response: run.output,
            history: history.clone().append(run.new_messages),
        })
    }

    /// Releases the tool client. Errors are logged, not returned.
    pub async fn cleanup(&self) {
        let Some(mut client) = self.tool_client.lock().await.take() else {
            debug!("session already cleaned up");
            return;
        };
        match client.cleanup().await {
            Ok(()) => debug!("session cleaned up"),
            Err(err) => error!("error during tool client cleanup: {err}"),
        }
    }

    /// Returns `true` once [`AgentSession::cleanup`] has run, or if the
    /// session never had a tool client.
    pub async fn is_cleaned_up(&self) -> bool {
        self.tool_client.lock().await.is_none()
    }
}
