//! HTTP and WebSocket transport for [`ChatUi`].
//!
//! | route     | purpose                          |
//! |-----------|----------------------------------|
//! | `/`       | the chat page                    |
//! | `/ws`     | one WebSocket per chat session   |
//! | `/health` | liveness probe, answers `ok`     |

use std::io;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ChatUi, ClientEvent, ServerEvent};

const INDEX_HTML: &str = include_str!("./index.html");

/// Builds the router serving the chat UI.
pub fn router(ui: Arc<ChatUi>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .with_state(ui)
}

/// Serves the chat UI until the listener fails.
pub async fn serve(listener: TcpListener, ui: Arc<ChatUi>) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("chat UI listening on http://{addr}");
    }
    axum::serve(listener, router(ui)).await
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ui): State<Arc<ChatUi>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ui))
        .into_response()
}

/// Runs one chat session for the lifetime of the socket.
async fn handle_socket(socket: WebSocket, ui: Arc<ChatUi>) {
    let id = Uuid::new_v4();
    debug!("session {id} connected");
    let (mut sink, mut stream) = socket.split();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    error!("cannot encode {event:?}: {err}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Messages are handled one at a time, in arrival order.
    let (message_tx, mut message_rx) = mpsc::unbounded_channel::<String>();
    let worker = tokio::spawn({
        let ui = Arc::clone(&ui);
        let event_tx = event_tx.clone();
        async move {
            ui.on_chat_start(id, &event_tx).await;
            while let Some(text) = message_rx.recv().await {
                ui.on_message(id, &text, &event_tx).await;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!("session {id}: socket error: {err}");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                match serde_json::from_str::<ClientEvent>(text.as_str()) {
                    Ok(ClientEvent::Message { content }) => {
                        message_tx.send(content).ok();
                    }
                    Err(err) => {
                        warn!("session {id}: bad frame: {err}");
                        let content = format!("Error: invalid message: {err}");
                        event_tx.send(ServerEvent::Error { content }).ok();
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    worker.abort();
    worker.await.ok();
    ui.on_chat_end(id).await;
    drop(event_tx);
    forwarder.await.ok();
    debug!("session {id} disconnected");
}
