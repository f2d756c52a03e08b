mod builder;

use futures_util::future::join_all;
use mcp_chat_model::{
    ModelMessage, ModelProviderError, ModelRequest, ToolCallRequest,
    ToolCallResult,
};
use tracing::Instrument;

use crate::model_client::ModelClient;
use crate::tool::{Error as ToolError, ErrorKind as ToolErrorKind, ToolSet};
pub use builder::AgentBuilder;

/// Default cap on model requests within one turn.
pub(crate) const DEFAULT_MAX_REQUESTS: usize = 50;

/// An agent: a model client, a fixed system prompt and a set of tools.
///
/// The agent keeps no conversation state. Each [`Agent::run`] receives the
/// prior messages and returns what the turn added, so one agent can serve
/// any number of conversations.
pub struct Agent {
    model_client: ModelClient,
    system_prompt: Option<String>,
    tools: ToolSet,
    max_requests: usize,
}

/// The outcome of one successful turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentRun {
    /// The final answer.
    pub output: String,
    /// Every message the turn produced, starting with the user input and
    /// ending with the final answer.
    pub new_messages: Vec<ModelMessage>,
}

/// Errors that fail a whole turn.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The model could not answer.
    #[error("model request failed: {0}")]
    Model(Box<dyn ModelProviderError>),
    /// A tool could not be reached anymore.
    #[error("tool `{name}` failed: {source}")]
    Tool {
        /// Name of the tool.
        name: String,
        /// The underlying tool error.
        #[source]
        source: ToolError,
    },
    /// The model kept asking for tools.
    #[error("no final answer after {0} model requests")]
    StepLimitExceeded(usize),
}

impl Agent {
    /// Returns the tools offered to the model.
    #[inline]
    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Runs one turn for `input`, given the prior messages.
    ///
    /// The model is asked repeatedly until it answers without requesting
    /// tools. Requested tools run concurrently, and their results, errors
    /// included, are passed back to the model.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. Dropping the future abandons the turn
    /// and nothing is recorded anywhere.
    pub async fn run(
        &self,
        input: &str,
        history: &[ModelMessage],
    ) -> Result<AgentRun, AgentError> {
        let mut new_messages = vec![ModelMessage::User(input.to_owned())];

        for step in 1..=self.max_requests {
            let request = self.build_request(history, &new_messages);
            let resp = self
                .model_client
                .send_request(request)
                .instrument(debug_span!("model request", step))
                .await
                .map_err(AgentError::Model)?;

            let msg = match resp.opaque_msg {
                Some(opaque_msg) => ModelMessage::Opaque(opaque_msg),
                None => {
                    if !resp.tool_calls.is_empty() {
                        warn!("provider returned tool calls without a message");
                    }
                    ModelMessage::Assistant(resp.transcript.clone())
                }
            };
            new_messages.push(msg);

            if resp.tool_calls.is_empty() {
                debug!("turn finished after {step} requests");
                return Ok(AgentRun {
                    output: resp.transcript,
                    new_messages,
                });
            }

            let results = self.call_tools(resp.tool_calls).await?;
            new_messages.extend(results.into_iter().map(ModelMessage::Tool));
        }

        warn!("giving up after {} requests", self.max_requests);
        Err(AgentError::StepLimitExceeded(self.max_requests))
    }

    fn build_request(
        &self,
        history: &[ModelMessage],
        new_messages: &[ModelMessage],
    ) -> ModelRequest {
        let system =
            self.system_prompt.iter().cloned().map(ModelMessage::System);
        ModelRequest {
            messages: system
                .chain(history.iter().cloned())
                .chain(new_messages.iter().cloned())
                .collect(),
            tools: self.tools.definitions(),
        }
    }

    async fn call_tools(
        &self,
        requests: Vec<ToolCallRequest>,
    ) -> Result<Vec<ToolCallResult>, AgentError> {
        let calls = requests.into_iter().map(|req| {
            let id = req.id.clone();
            let name = req.name.clone();
            let span = debug_span!("tool call", tool = %name, id = %id);
            let fut = self.tools.execute(req);
            async move { (id, name, fut.await) }.instrument(span)
        });

        let mut results = Vec::new();
        for (id, name, result) in join_all(calls).await {
            let content = match result {
                Ok(content) => content,
                Err(err) if err.kind() == ToolErrorKind::Unavailable => {
                    error!("tool `{name}` is unavailable: {err}");
                    return Err(AgentError::Tool { name, source: err });
                }
                Err(err) => {
                    debug!("tool `{name}` failed: {err}");
                    format!("Error: {}", err.reason())
                }
            };
            results.push(ToolCallResult { id, content });
        }
        Ok(results)
    }
}
