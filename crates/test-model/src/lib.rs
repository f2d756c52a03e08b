//! A scripted fake model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use mcp_chat_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, OpaqueMessage,
    ToolCallRequest,
};
use serde::{Deserialize, Serialize};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// The assistant message recorded into [`OpaqueMessage`]s by this model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedMessage {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

pub struct TestModelResponse {
    id: String,
    events: Vec<PresetEvent>,
    event_idx: usize,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
    message: ScriptedMessage,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.event_idx > this.events.len() {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        let Some(preset) = this.events.get(this.event_idx) else {
            this.event_idx += 1;
            let reason = if this.message.tool_calls.is_empty() {
                ModelFinishReason::Stop
            } else {
                ModelFinishReason::ToolCalls
            };
            return Poll::Ready(Ok(Some(ModelResponseEvent::Completed(
                reason,
            ))));
        };
        this.event_idx += 1;

        let event = match preset {
            PresetEvent::MessageDelta(delta) => {
                this.message.text.push_str(delta);
                ModelResponseEvent::MessageDelta(delta.clone())
            }
            PresetEvent::ToolCall(req) => {
                this.message.tool_calls.push(req.clone());
                ModelResponseEvent::ToolCall(req.clone())
            }
        };
        Poll::Ready(Ok(Some(event)))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        OpaqueMessage::from_raw(self.id.clone(), &self.message).ok()
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<PresetResponse>,
    requests: Vec<ModelRequest>,
    served: u64,
}

/// A local fake model for testing purpose.
///
/// Responses are added to a script up front and consumed one per request,
/// in order. A request arriving after the script is exhausted fails. Every
/// request is recorded, so tests can check what the agent actually sent.
///
/// Clones share the same script.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl TestModelProvider {
    /// Appends a response to the script.
    #[inline]
    pub fn add_response(&self, preset: PresetResponse) {
        self.lock().responses.push_back(preset);
    }

    /// Sets the delay before each event of a response.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far.
    #[inline]
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    /// Returns the number of responses not consumed yet.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.lock().responses.len()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Script> {
        // A panicking test may poison the lock, the script is still usable.
        self.script.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn next_response(
        &self,
        req: &ModelRequest,
    ) -> Result<TestModelResponse, Error> {
        let mut script = self.lock();
        script.requests.push(req.clone());

        let Some(preset) = script.responses.front_mut() else {
            return Err(Error {
                message: "no enough responses",
                kind: ErrorKind::Other,
            });
        };
        if let Some(left) = preset.failures {
            if left == 0 {
                return Err(Error {
                    message: "preset failure",
                    kind: ErrorKind::Other,
                });
            }
            preset.failures = if left == 1 { None } else { Some(left - 1) };
            return Err(Error {
                message: "preset transient failure",
                kind: ErrorKind::RateLimitExceeded,
            });
        }

        let Some(preset) = script.responses.pop_front() else {
            unreachable!("front response checked above");
        };
        script.served += 1;
        Ok(TestModelResponse {
            id: format!("test:{}", script.served),
            events: preset.events,
            event_idx: 0,
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            sleep: None,
            message: ScriptedMessage {
                text: String::new(),
                tool_calls: vec![],
            },
        })
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        ready(self.next_response(req))
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use mcp_chat_model::{ModelMessage, ModelRequest};
    use serde_json::json;

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> (String, Vec<ToolCallRequest>, ModelFinishReason, OpaqueMessage) {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        let mut tool_calls = vec![];
        let reason = loop {
            let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
                .await
                .unwrap()
                .unwrap();
            match event {
                ModelResponseEvent::Completed(reason) => break reason,
                ModelResponseEvent::MessageDelta(delta) => {
                    msg.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_calls.push(req),
            }
        };
        let opaque = resp.make_opaque_message().unwrap();
        (msg, tool_calls, reason, opaque)
    }

    #[tokio::test]
    async fn test_script_in_order() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::MessageDelta("Hello, ".to_owned()),
            PresetEvent::MessageDelta("world!".to_owned()),
        ]));
        provider.add_response(PresetResponse::tool_call(
            "call_1",
            "read_file",
            json!({ "filename": "todo.txt" }),
        ));

        let req = ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
        };
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, tool_calls, reason, opaque) = collect_response(resp).await;
        assert_eq!(msg, "Hello, world!");
        assert!(tool_calls.is_empty());
        assert_eq!(reason, ModelFinishReason::Stop);
        let recorded: ScriptedMessage = opaque.to_raw().unwrap();
        assert_eq!(recorded.text, "Hello, world!");

        let resp = provider.send_request(&req).await.unwrap();
        let (_, tool_calls, reason, _) = collect_response(resp).await;
        assert_eq!(reason, ModelFinishReason::ToolCalls);
        assert_eq!(tool_calls[0].name, "read_file");
        assert_eq!(tool_calls[0].arguments, json!({ "filename": "todo.txt" }));

        assert!(provider.send_request(&req).await.is_err());
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_failures() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::text("ok").with_failures(2));
        let req = ModelRequest::default();

        for _ in 0..2 {
            let Err(err) = provider.send_request(&req).await else {
                panic!("expected a transient failure");
            };
            assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        }
        assert!(provider.send_request(&req).await.is_ok());

        provider.add_response(PresetResponse::text("never").with_failures(0));
        for _ in 0..3 {
            let Err(err) = provider.send_request(&req).await else {
                panic!("expected a permanent failure");
            };
            assert_eq!(err.kind(), ErrorKind::Other);
        }
        assert_eq!(provider.remaining(), 1);
    }
}
