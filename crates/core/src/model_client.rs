use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use mcp_chat_model::{
    ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent, OpaqueMessage, ToolCallRequest,
};
use tracing::Instrument;

type SendRequestResult = Result<
    ModelClientResponse,
    backoff::Error<Box<dyn ModelProviderError>>,
>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest) -> BoxedSendRequestFuture
        + Send + Sync
>;

const INITIAL_RETRY_INTERVAL: Duration = Duration::from_millis(500);
pub(crate) const DEFAULT_MAX_RETRY_TIME: Duration = Duration::from_secs(30);

/// A type-erased wrapper around a model provider.
///
/// Requests rejected with a transient error (see
/// [`mcp_chat_model::ErrorKind::is_transient`]) are sent again with an
/// exponential backoff. Errors while streaming are never retried.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    max_retry_time: Duration,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp = match fut.await {
                        Ok(resp) => resp,
                        Err(err) if err.kind().is_transient() => {
                            return Err(backoff::Error::transient(
                                Box::new(err) as Box<dyn ModelProviderError>,
                            ));
                        }
                        Err(err) => {
                            error!("request rejected: {err}");
                            return Err(backoff::Error::permanent(
                                Box::new(err) as Box<dyn ModelProviderError>,
                            ));
                        }
                    };
                    handle_response(resp)
                        .await
                        .map_err(backoff::Error::permanent)
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            max_retry_time: DEFAULT_MAX_RETRY_TIME,
        }
    }

    /// Sets how long transient failures are retried before giving up.
    #[inline]
    pub fn set_max_retry_time(&mut self, max_retry_time: Duration) {
        self.max_retry_time = max_retry_time;
    }

    /// Sends a request and returns the response.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    pub async fn send_request(
        &self,
        req: ModelRequest,
    ) -> Result<ModelClientResponse, Box<dyn ModelProviderError>> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(INITIAL_RETRY_INTERVAL)
            .with_max_elapsed_time(Some(self.max_retry_time))
            .build();
        backoff::future::retry_notify(
            backoff,
            || (self.handler_fn)(req.clone()),
            |err: Box<dyn ModelProviderError>, after: Duration| {
                warn!("model request failed ({err}), retrying in {after:?}");
            },
        )
        .await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug)]
pub struct ModelClientResponse {
    pub transcript: String,
    pub opaque_msg: Option<OpaqueMessage>,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
}

async fn handle_response<R: ModelResponse + 'static>(
    resp: R,
) -> Result<ModelClientResponse, Box<dyn ModelProviderError>> {
    let mut transcript = String::new();
    let opaque_msg;
    let mut tool_calls = Vec::new();

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("response stream failed: {err}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            // The stream ended cleanly, so the full message is available.
            opaque_msg = pinned_resp.make_opaque_message();
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                transcript.push_str(&msg);
            }
            ModelResponseEvent::ToolCall(req) => {
                tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                trace!("model finished: {reason:?}");
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse {
        transcript,
        opaque_msg,
        tool_calls,
    })
}
