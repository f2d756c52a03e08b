//! Fakes shared by the unit tests.

use std::future::ready;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use mcp_chat_core::tool::{
    Tool, ToolClient, ToolClientError, ToolResult, ToolSet,
};
use mcp_chat_model::ToolCallRequest;
use mcp_chat_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use serde_json::{Value, json};

use crate::{AgentSession, SessionBuilder};

/// Always answers "12:00".
pub struct Clock(Value);

impl Clock {
    pub fn new() -> Self {
        Self(json!({ "type": "object", "properties": {} }))
    }
}

impl Tool for Clock {
    type Input = Value;

    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Tells the time."
    }

    fn parameter_schema(&self) -> &Value {
        &self.0
    }

    fn execute(
        &self,
        _input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(Ok("12:00".to_owned()))
    }
}

/// Counts calls instead of talking to real servers.
#[derive(Clone, Default)]
pub struct FakeToolClient {
    pub starts: Arc<AtomicUsize>,
    pub cleanups: Arc<AtomicUsize>,
    pub fail_start: bool,
}

impl FakeToolClient {
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Default::default()
        }
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolClient for FakeToolClient {
    async fn start(&mut self) -> Result<ToolSet, ToolClientError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err("server `clock` exited during handshake".into());
        }
        Ok(ToolSet::new().with_tool(Clock::new()))
    }

    async fn cleanup(&mut self) -> Result<(), ToolClientError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A model answer that asks for the clock tool.
pub fn clock_call(id: &str) -> PresetResponse {
    PresetResponse::with_events([
        PresetEvent::MessageDelta("Let me check. ".to_owned()),
        PresetEvent::ToolCall(ToolCallRequest {
            id: id.to_owned(),
            name: "clock".to_owned(),
            arguments: json!({}),
        }),
    ])
}

pub async fn session_with(
    model: &TestModelProvider,
    client: &FakeToolClient,
) -> AgentSession {
    SessionBuilder::with_model_provider(model.clone())
        .with_tool_client(client.clone())
        .build()
        .await
        .expect("fake tool client starts")
}
