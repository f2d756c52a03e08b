use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use mcp_chat_test_model::{PresetResponse, TestModelProvider};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use super::server::serve;
use super::{ChatUi, ClientEvent, EventSink, ServerEvent, SessionFactory};
use crate::testing::FakeToolClient;
use crate::{AgentSession, InitializationError, SessionBuilder};

const READY: &str = "MCP Agent initialized and ready!";
const INITIALIZING: &str = "Initializing MCP Agent...";

#[derive(Clone, Default)]
struct FakeFactory {
    model: TestModelProvider,
    client: FakeToolClient,
    creates: Arc<AtomicUsize>,
}

impl FakeFactory {
    fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create(&self) -> Result<AgentSession, InitializationError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        SessionBuilder::with_model_provider(self.model.clone())
            .with_tool_client(self.client.clone())
            .build()
            .await
    }
}

fn ui_with(factory: &FakeFactory) -> ChatUi {
    ChatUi::new(factory.clone(), Duration::from_millis(50))
}

fn channel() -> (EventSink, mpsc::UnboundedReceiver<ServerEvent>) {
    mpsc::unbounded_channel()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = vec![];
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn status(content: &str) -> ServerEvent {
    ServerEvent::Status {
        content: content.to_owned(),
    }
}

fn token(content: &str) -> ServerEvent {
    ServerEvent::Token {
        content: content.to_owned(),
    }
}

#[tokio::test]
async fn test_chat_start() {
    let factory = FakeFactory::default();
    let ui = ui_with(&factory);
    let (tx, mut rx) = channel();
    let id = Uuid::new_v4();

    ui.on_chat_start(id, &tx).await;

    assert_eq!(drain(&mut rx), vec![status(INITIALIZING), status(READY)]);
    assert_eq!(factory.creates(), 1);
    assert_eq!(ui.session_count(), 1);
    assert_eq!(ui.history(id).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_restart_keeps_agent_and_resets_history() {
    let factory = FakeFactory::default();
    factory.model.add_response(PresetResponse::text("Hi!"));
    let ui = ui_with(&factory);
    let (tx, mut rx) = channel();
    let id = Uuid::new_v4();

    ui.on_chat_start(id, &tx).await;
    ui.on_message(id, "Hello", &tx).await;
    assert_eq!(ui.history(id).await.unwrap().len(), 2);
    drain(&mut rx);

    ui.on_chat_start(id, &tx).await;

    assert_eq!(drain(&mut rx), vec![status(READY)]);
    assert_eq!(factory.creates(), 1);
    assert!(ui.history(id).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_answer_streams_line_by_line() {
    let factory = FakeFactory::default();
    factory
        .model
        .add_response(PresetResponse::text("Sunny.\nLight wind.\nNo rain."));
    let ui = ui_with(&factory);
    let (tx, mut rx) = channel();
    let id = Uuid::new_v4();
    ui.on_chat_start(id, &tx).await;
    drain(&mut rx);

    let started = tokio::time::Instant::now();
    ui.on_message(id, "Weather in Oslo?", &tx).await;

    assert_eq!(
        drain(&mut rx),
        vec![
            ServerEvent::StreamStart,
            token("Sunny.\n"),
            token("Light wind.\n"),
            token("No rain."),
            ServerEvent::StreamEnd,
        ]
    );
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(ui.history(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_turn_reports_error() {
    let factory = FakeFactory::default();
    let ui = ui_with(&factory);
    let (tx, mut rx) = channel();
    let id = Uuid::new_v4();
    ui.on_chat_start(id, &tx).await;
    drain(&mut rx);

    // The model has nothing scripted, so the request fails.
    ui.on_message(id, "Hello", &tx).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    let ServerEvent::Error { content } = &events[0] else {
        panic!("expected an error event, got {events:?}");
    };
    assert!(content.starts_with("Error: "), "{content}");
    assert!(ui.history(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_initialization_failure() {
    let factory = FakeFactory {
        client: FakeToolClient::failing(),
        ..Default::default()
    };
    let ui = ui_with(&factory);
    let (tx, mut rx) = channel();
    let id = Uuid::new_v4();

    ui.on_chat_start(id, &tx).await;
    let events = drain(&mut rx);
    assert_eq!(events[0], status(INITIALIZING));
    let ServerEvent::Error { content } = &events[1] else {
        panic!("expected an error event, got {events:?}");
    };
    assert!(content.starts_with("Failed to initialize MCP Agent: "));
    assert_eq!(factory.client.cleanups(), 1);

    ui.on_message(id, "Hello", &tx).await;
    assert_eq!(
        drain(&mut rx),
        vec![ServerEvent::Error {
            content: "Error: MCP Agent is not initialized".to_owned()
        }]
    );

    ui.on_chat_end(id).await;
    assert_eq!(factory.client.cleanups(), 1);
}

#[tokio::test]
async fn test_message_before_start() {
    let ui = ui_with(&FakeFactory::default());
    let (tx, mut rx) = channel();

    ui.on_message(Uuid::new_v4(), "Hello", &tx).await;

    assert_eq!(
        drain(&mut rx),
        vec![ServerEvent::Error {
            content: "Error: chat not started".to_owned()
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_turns_of_a_session_are_serialized() {
    let mut factory = FakeFactory::default();
    factory.model.set_delay(Duration::from_millis(100));
    factory.model.add_response(PresetResponse::text("First."));
    factory.model.add_response(PresetResponse::text("Second."));
    let ui = ui_with(&factory);
    let (tx, mut rx) = channel();
    let id = Uuid::new_v4();
    ui.on_chat_start(id, &tx).await;
    drain(&mut rx);

    tokio::join!(
        ui.on_message(id, "one", &tx),
        ui.on_message(id, "two", &tx),
    );

    assert_eq!(
        drain(&mut rx),
        vec![
            ServerEvent::StreamStart,
            token("First."),
            ServerEvent::StreamEnd,
            ServerEvent::StreamStart,
            token("Second."),
            ServerEvent::StreamEnd,
        ]
    );
    // The second request already saw the first turn.
    let requests = factory.model.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages.len(), 4);
    assert_eq!(ui.history(id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let factory = FakeFactory::default();
    factory.model.add_response(PresetResponse::text("Hi!"));
    let ui = ui_with(&factory);
    let (tx, _rx) = channel();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    ui.on_chat_start(a, &tx).await;
    ui.on_chat_start(b, &tx).await;
    ui.on_message(a, "Hello", &tx).await;

    assert_eq!(factory.creates(), 2);
    assert_eq!(ui.history(a).await.unwrap().len(), 2);
    assert!(ui.history(b).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_end_cleans_up_once() {
    let factory = FakeFactory::default();
    let ui = ui_with(&factory);
    let (tx, _rx) = channel();
    let id = Uuid::new_v4();
    ui.on_chat_start(id, &tx).await;

    ui.on_chat_end(id).await;
    ui.on_chat_end(id).await;

    assert_eq!(factory.client.cleanups(), 1);
    assert_eq!(ui.session_count(), 0);
    assert!(ui.history(id).await.is_none());
}

#[test]
fn test_event_json() {
    let piece = serde_json::to_value(token("Hi\n")).unwrap();
    assert_eq!(piece, json!({ "type": "token", "content": "Hi\n" }));
    let start = serde_json::to_value(ServerEvent::StreamStart).unwrap();
    assert_eq!(start, json!({ "type": "stream_start" }));

    let message: ClientEvent =
        serde_json::from_str(r#"{"type":"message","content":"Hello"}"#)
            .unwrap();
    assert_eq!(
        message,
        ClientEvent::Message {
            content: "Hello".to_owned()
        }
    );
    assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"ping"}"#).is_err());
}

async fn get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_http_routes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ui = Arc::new(ui_with(&FakeFactory::default()));
    let server = tokio::spawn(serve(listener, ui));

    let health = get(addr, "/health").await;
    assert!(health.starts_with("HTTP/1.1 200"), "{health}");
    assert!(health.ends_with("ok"), "{health}");

    let index = get(addr, "/").await;
    assert!(index.starts_with("HTTP/1.1 200"), "{index}");
    assert!(index.contains("new WebSocket"));

    let missing = get(addr, "/nope").await;
    assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

    server.abort();
}


type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn connect(ui: &Arc<ChatUi>) -> Socket {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, Arc::clone(ui)));
    let (socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
}

async fn next_event(socket: &mut Socket) -> ServerEvent {
    loop {
        let frame = timeout(WAIT, socket.next())
            .await
            .expect("event in time")
            .expect("socket open")
            .unwrap();
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_message(socket: &mut Socket, content: &str) {
    let frame = json!({ "type": "message", "content": content }).to_string();
    socket.send(WsMessage::text(frame)).await.unwrap();
}

async fn wait_until_closed(ui: &ChatUi) {
    timeout(WAIT, async {
        while ui.session_count() > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session ended in time");
}

#[tokio::test]
async fn test_websocket_session() {
    let factory = FakeFactory::default();
    factory
        .model
        .add_response(PresetResponse::text("Sunny.\nWindy."));
    let ui = Arc::new(ui_with(&factory));
    let mut socket = connect(&ui).await;

    assert_eq!(next_event(&mut socket).await, status(INITIALIZING));
    assert_eq!(next_event(&mut socket).await, status(READY));

    socket.send(WsMessage::text(r#"{"type":"ping"}"#)).await.unwrap();
    let ServerEvent::Error { content } = next_event(&mut socket).await else {
        panic!("expected an error event");
    };
    assert!(content.starts_with("Error: invalid message"), "{content}");

    send_message(&mut socket, "Weather in Oslo?").await;
    let mut events = vec![];
    loop {
        let event = next_event(&mut socket).await;
        let done = event == ServerEvent::StreamEnd;
        events.push(event);
        if done {
            break;
        }
    }
    assert_eq!(
        events,
        vec![
            ServerEvent::StreamStart,
            token("Sunny.\n"),
            token("Windy."),
            ServerEvent::StreamEnd,
        ]
    );

    socket.close(None).await.unwrap();
    wait_until_closed(&ui).await;
    assert_eq!(factory.creates(), 1);
    assert_eq!(factory.client.cleanups(), 1);
}

#[tokio::test]
async fn test_websocket_closed_during_turn() {
    let mut factory = FakeFactory::default();
    factory.model.set_delay(Duration::from_secs(60));
    factory.model.add_response(PresetResponse::text("Too late."));
    let ui = Arc::new(ui_with(&factory));
    let mut socket = connect(&ui).await;
    assert_eq!(next_event(&mut socket).await, status(INITIALIZING));
    assert_eq!(next_event(&mut socket).await, status(READY));

    send_message(&mut socket, "Slow question").await;
    socket.close(None).await.unwrap();

    wait_until_closed(&ui).await;
    assert_eq!(factory.client.cleanups(), 1);
}
