//! The browser chat UI.
//!
//! [`ChatUi`] holds the per-session state and reacts to chat events. The
//! [`server`] module maps WebSocket connections onto those events.

pub mod server;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use mcp_chat_core::HistoryBuffer;
use serde::{Deserialize, Serialize};
use tokio::sync::{self, OnceCell, mpsc};
use tokio::time::sleep;
use uuid::Uuid;

use crate::{AgentSession, InitializationError, SessionConfig};

const READY: &str = "MCP Agent initialized and ready!";

/// Identifies one UI session.
pub type SessionId = Uuid;

/// Where a session's events go.
pub type EventSink = mpsc::UnboundedSender<ServerEvent>;

/// Builds the agent session of a UI session.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Creates and starts a new session.
    async fn create(&self) -> Result<AgentSession, InitializationError>;
}

#[async_trait]
impl SessionFactory for SessionConfig {
    async fn create(&self) -> Result<AgentSession, InitializationError> {
        AgentSession::initialize(self).await
    }
}

/// An event sent to the browser.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A status line.
    Status {
        /// Text of the line.
        content: String,
    },
    /// An assistant message begins.
    StreamStart,
    /// The next piece of the assistant message.
    Token {
        /// Text of the piece.
        content: String,
    },
    /// The assistant message is complete.
    StreamEnd,
    /// An error message.
    Error {
        /// Text of the message.
        content: String,
    },
}

impl ServerEvent {
    fn status(content: impl Into<String>) -> Self {
        ServerEvent::Status {
            content: content.into(),
        }
    }

    fn error(content: impl Into<String>) -> Self {
        ServerEvent::Error {
            content: content.into(),
        }
    }
}

/// An event sent by the browser.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The user sent a message.
    Message {
        /// Text of the message.
        content: String,
    },
}

#[derive(Default)]
struct SessionState {
    agent: OnceCell<AgentSession>,
    // Held for a whole turn, which serializes the turns of a session.
    history: sync::Mutex<HistoryBuffer>,
}

type Sessions = HashMap<SessionId, Arc<SessionState>>;

/// Per-session state and behavior of the chat UI.
pub struct ChatUi {
    factory: Arc<dyn SessionFactory>,
    stream_delay: Duration,
    sessions: Mutex<Sessions>,
}

impl ChatUi {
    /// Creates a UI creating its agent sessions with `factory`, streaming
    /// one line of each answer per `stream_delay`.
    pub fn new(
        factory: impl SessionFactory + 'static,
        stream_delay: Duration,
    ) -> Self {
        Self {
            factory: Arc::new(factory),
            stream_delay,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of open sessions.
    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Starts (or restarts) a chat. The history always starts empty; the
    /// agent session is only created the first time.
    pub async fn on_chat_start(&self, id: SessionId, events: &EventSink) {
        let state = Arc::clone(self.lock_sessions().entry(id).or_default());
        state.history.lock().await.reset();

        if state.agent.initialized() {
            events.send(ServerEvent::status(READY)).ok();
            return;
        }

        events.send(ServerEvent::status("Initializing MCP Agent...")).ok();
        let created = state
            .agent
            .get_or_try_init(|| self.factory.create())
            .await;
        match created {
            Ok(_) => {
                info!("session {id} ready");
                events.send(ServerEvent::status(READY)).ok();
            }
            Err(err) => {
                error!("session {id} failed to initialize: {err}");
                events
                    .send(ServerEvent::error(format!(
                        "Failed to initialize MCP Agent: {err}"
                    )))
                    .ok();
            }
        }
    }

    /// Answers a message, streaming the answer line by line.
    pub async fn on_message(
        &self,
        id: SessionId,
        text: &str,
        events: &EventSink,
    ) {
        let state = self.lock_sessions().get(&id).cloned();
        let Some(state) = state else {
            events.send(ServerEvent::error("Error: chat not started")).ok();
            return;
        };
        let Some(agent) = state.agent.get() else {
            events
                .send(ServerEvent::error("Error: MCP Agent is not initialized"))
                .ok();
            return;
        };

        let mut history = state.history.lock().await;
        let turn = match agent.submit(text, &history).await {
            Ok(turn) => turn,
            Err(err) => {
                warn!("session {id}: turn failed: {err}");
                events.send(ServerEvent::error(format!("Error: {err}"))).ok();
                return;
            }
        };

        events.send(ServerEvent::StreamStart).ok();
        for line in turn.response.split_inclusive('\n') {
            sleep(self.stream_delay).await;
            events
                .send(ServerEvent::Token {
                    content: line.to_owned(),
                })
                .ok();
        }
        events.send(ServerEvent::StreamEnd).ok();

        *history = turn.history.trim();
    }

    /// Ends a chat and releases its agent session.
    pub async fn on_chat_end(&self, id: SessionId) {
        let state = self.lock_sessions().remove(&id);
        let Some(state) = state else {
            return;
        };
        if let Some(agent) = state.agent.get() {
            agent.cleanup().await;
        }
        debug!("session {id} ended");
    }

    /// Returns a copy of the session's history.
    pub async fn history(&self, id: SessionId) -> Option<HistoryBuffer> {
        let state = self.lock_sessions().get(&id).cloned()?;
        let history = state.history.lock().await;
        Some(history.clone())
    }

    #[inline]
    fn lock_sessions(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|err| err.into_inner())
    }
}
