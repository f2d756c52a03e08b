use std::pin::Pin;
use std::task::{Context, Poll, ready};

use mcp_chat_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    OpaqueMessage, ToolCallRequest,
};
use pin_project_lite::pin_project;
use serde_json::{Map, Value};

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, Delta, Message, ToolCall};

/// Everything received so far for one streamed completion.
struct PartialState {
    sse: Sse,
    id: Option<String>,
    content: String,
    reasoning_content: Option<String>,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<ModelFinishReason>,
    // Set once the endpoint finished the choice or closed the stream.
    // Tool calls are only emitted after that, since their arguments arrive
    // in pieces.
    input_done: bool,
    emitted_tool_calls: usize,
    completed: bool,
}

impl PartialState {
    fn new(sse: Sse) -> Self {
        Self {
            sse,
            id: None,
            content: String::new(),
            reasoning_content: None,
            tool_calls: vec![],
            finish_reason: None,
            input_done: false,
            emitted_tool_calls: 0,
            completed: false,
        }
    }

    /// Merges a delta into the state, returning the new text if any.
    fn apply_delta(&mut self, delta: Delta) -> Option<String> {
        if let Some(reasoning) = &delta.reasoning_content {
            self.reasoning_content
                .get_or_insert_default()
                .push_str(reasoning);
        }
        for tool_call in delta.tool_calls.unwrap_or_default() {
            let existing = match tool_call.index {
                Some(index) => self
                    .tool_calls
                    .iter()
                    .position(|t| t.index == Some(index)),
                // Without an index, a fragment without an id continues the
                // last call.
                None if tool_call.id.is_none() => {
                    self.tool_calls.len().checked_sub(1)
                }
                None => None,
            };
            match existing {
                Some(pos) => {
                    merge_tool_call(&mut self.tool_calls[pos], tool_call)
                }
                None => self.tool_calls.push(tool_call),
            }
        }

        let content = delta.content.filter(|c| !c.is_empty())?;
        self.content.push_str(&content);
        Some(content)
    }

    fn tool_call_request(&self, idx: usize) -> Result<ToolCallRequest, Error> {
        let tool_call = &self.tool_calls[idx];
        let function = tool_call.function.as_ref();
        let name = function
            .and_then(|f| f.name.clone())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                Error::new(
                    "tool call without a name",
                    ErrorKind::MalformedResponse,
                )
            })?;
        let raw_arguments = function
            .and_then(|f| f.arguments.as_deref())
            .map(str::trim)
            .unwrap_or_default();
        let arguments = if raw_arguments.is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(raw_arguments).map_err(|err| {
                Error::new(
                    format!("invalid arguments for `{name}`: {err}"),
                    ErrorKind::MalformedResponse,
                )
            })?
        };
        Ok(ToolCallRequest {
            id: tool_call.id.clone().unwrap_or_else(|| format!("call_{idx}")),
            name,
            arguments,
        })
    }

    fn finish(self) -> (String, Message) {
        let id = self.id.unwrap_or_else(|| "chatcmpl".to_owned());
        let content = if self.content.is_empty() && !self.tool_calls.is_empty()
        {
            None
        } else {
            Some(self.content)
        };
        let tool_calls = if self.tool_calls.is_empty() {
            None
        } else {
            Some(self.tool_calls)
        };
        let msg = Message::Assistant {
            content,
            tool_calls,
            reasoning_content: self.reasoning_content,
        };
        (id, msg)
    }
}

fn merge_tool_call(partial: &mut ToolCall, fragment: ToolCall) {
    if partial.id.is_none() {
        partial.id = fragment.id;
    }
    if partial.r#type.is_none() {
        partial.r#type = fragment.r#type;
    }
    let Some(function) = fragment.function else {
        return;
    };
    match &mut partial.function {
        Some(partial_func) => {
            if let Some(name) = function.name {
                partial_func.name.get_or_insert_default().push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                partial_func
                    .arguments
                    .get_or_insert_default()
                    .push_str(&arguments);
            }
        }
        None => partial.function = Some(function),
    }
}

fn parse_finish_reason(reason: &str) -> ModelFinishReason {
    match reason {
        "tool_calls" | "function_call" => ModelFinishReason::ToolCalls,
        _ => ModelFinishReason::Stop,
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
        full_msg: Option<(String, Message)>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState::new(sse);
        Self {
            next_event_fut: Some(Box::pin(next_event(partial_state))),
            full_msg: None,
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let result = ready!(next_event_fut.as_mut().poll(cx));
        *this.next_event_fut = None;

        match result {
            Ok((Some(event), partial_state)) => {
                *this.next_event_fut =
                    Some(Box::pin(next_event(partial_state)));
                Poll::Ready(Ok(Some(event)))
            }
            Ok((None, partial_state)) => {
                *this.full_msg = Some(partial_state.finish());
                Poll::Ready(Ok(None))
            }
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        let (id, msg) = self.full_msg.as_ref()?;
        OpaqueMessage::from_raw(id.clone(), msg).ok()
    }
}

async fn next_event(mut state: PartialState) -> NextEvent {
    let mut message_delta = None;

    while !state.input_done && message_delta.is_none() {
        let data = state.sse.next_event().await.map_err(|err| {
            Error::new(format!("{err}"), ErrorKind::Unreachable)
        })?;
        let Some(data) = data else {
            state.input_done = true;
            break;
        };
        trace!("got sse event: {data}");
        if data == "[DONE]" {
            state.input_done = true;
            break;
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&data)
            .map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::MalformedResponse)
            })?;
        if state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id {
            return Err(Error::new(
                "chunk id mismatch",
                ErrorKind::MalformedResponse,
            ));
        }

        // Usage reports come as a chunk without choices.
        let Some(choice) = chunk.choices.into_iter().next() else {
            continue;
        };
        message_delta = state.apply_delta(choice.delta);
        if let Some(reason) = choice.finish_reason {
            state.finish_reason = Some(parse_finish_reason(&reason));
            state.input_done = true;
        }
    }

    // Order matters: text first, then the tool calls, then completion.

    if let Some(message_delta) = message_delta {
        let event = ModelResponseEvent::MessageDelta(message_delta);
        return Ok((Some(event), state));
    }

    if state.emitted_tool_calls < state.tool_calls.len() {
        let request = state.tool_call_request(state.emitted_tool_calls)?;
        state.emitted_tool_calls += 1;
        return Ok((Some(ModelResponseEvent::ToolCall(request)), state));
    }

    if !state.completed {
        state.completed = true;
        let reason = if state.tool_calls.is_empty() {
            state.finish_reason.unwrap_or(ModelFinishReason::Stop)
        } else {
            // Some local servers report "stop" even when calling tools.
            ModelFinishReason::ToolCalls
        };
        return Ok((Some(ModelResponseEvent::Completed(reason)), state));
    }

    Ok((None, state))
}
