use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::{poll_fn, ready};
use std::pin::Pin;
use std::task::{self, Poll, ready};
use std::time::Duration;

use mcp_chat_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
    OpaqueMessage,
};
use tokio::time::{Sleep, sleep};

#[derive(Debug)]
struct EchoError(ErrorKind);

impl Display for EchoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "echo failed: {}", self.0)
    }
}

impl Error for EchoError {}

impl ModelProviderError for EchoError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Answers with the last user message, one word per event.
struct EchoResponse {
    words: VecDeque<String>,
    finished: bool,
    sleep: Option<Pin<Box<Sleep>>>,
    text: String,
}

impl ModelResponse for EchoResponse {
    type Error = EchoError;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        let sleep = this
            .sleep
            .get_or_insert_with(|| Box::pin(sleep(Duration::from_millis(1))));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        if let Some(word) = this.words.pop_front() {
            this.text.push_str(&word);
            return Poll::Ready(Ok(Some(ModelResponseEvent::MessageDelta(
                word,
            ))));
        }
        if !this.finished {
            this.finished = true;
            return Poll::Ready(Ok(Some(ModelResponseEvent::Completed(
                ModelFinishReason::Stop,
            ))));
        }
        Poll::Ready(Ok(None))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        OpaqueMessage::from_raw("echo:0", &self.text).ok()
    }
}

struct EchoProvider;

impl ModelProvider for EchoProvider {
    type Error = EchoError;
    type Response = EchoResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let last_user = req.messages.iter().rev().find_map(|msg| match msg {
            ModelMessage::User(text) => Some(text.clone()),
            _ => None,
        });
        let result = match last_user {
            Some(text) => {
                let mut words: VecDeque<String> =
                    text.split(' ').map(|w| format!("{w} ")).collect();
                if let Some(last) = words.back_mut() {
                    last.pop();
                }
                Ok(EchoResponse {
                    words,
                    finished: false,
                    sleep: None,
                    text: String::new(),
                })
            }
            None => Err(EchoError(ErrorKind::MalformedResponse)),
        };
        ready(result)
    }
}

async fn collect(mut resp: EchoResponse) -> (String, Vec<ModelResponseEvent>) {
    let mut text = String::new();
    let mut events = vec![];
    while let Some(event) =
        poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
            .await
            .unwrap()
    {
        if let ModelResponseEvent::MessageDelta(delta) = &event {
            text.push_str(delta);
        }
        events.push(event);
    }
    let opaque = resp.make_opaque_message().unwrap();
    assert_eq!(opaque.to_raw::<String>().unwrap(), text);
    (text, events)
}

#[tokio::test]
async fn test_echo_last_user_message() {
    let req = ModelRequest {
        messages: vec![
            ModelMessage::System("Be an echo.".to_owned()),
            ModelMessage::User("first".to_owned()),
            ModelMessage::Assistant("first".to_owned()),
            ModelMessage::User("good morning".to_owned()),
        ],
        tools: vec![],
    };
    let resp = EchoProvider.send_request(&req).await.unwrap();
    let (text, events) = collect(resp).await;

    assert_eq!(text, "good morning");
    assert_eq!(
        events.last(),
        Some(&ModelResponseEvent::Completed(ModelFinishReason::Stop))
    );
}

#[tokio::test]
async fn test_error_kind() {
    let req = ModelRequest::default();
    let err = match EchoProvider.send_request(&req).await {
        Ok(_) => panic!("expected an error"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    assert!(!err.kind().is_transient());
}
