//! The bounded conversation history.

use mcp_chat_model::ModelMessage;
use serde::{Deserialize, Serialize};

/// Maximum number of messages kept after [`HistoryBuffer::trim`].
pub const MAX_HISTORY_LENGTH: usize = 50;

/// Messages of one conversation, oldest first.
///
/// The buffer never looks inside the messages. It only appends them and
/// drops the oldest ones when trimmed, so a trim may separate a tool call
/// from its result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryBuffer(Vec<ModelMessage>);

impl HistoryBuffer {
    /// Creates an empty history.
    #[inline]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns the history with `messages` added at the end.
    pub fn append<I>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = ModelMessage>,
    {
        self.0.extend(messages);
        self
    }

    /// Keeps only the most recent [`MAX_HISTORY_LENGTH`] messages.
    pub fn trim(mut self) -> Self {
        let len = self.0.len();
        if len > MAX_HISTORY_LENGTH {
            self.0.drain(..len - MAX_HISTORY_LENGTH);
        }
        self
    }

    /// Forgets every message.
    #[inline]
    pub fn reset(&mut self) {
        self.0.clear();
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no messages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the messages, oldest first.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.0
    }

    /// Returns an iterator over the messages, oldest first.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, ModelMessage> {
        self.0.iter()
    }
}

impl From<Vec<ModelMessage>> for HistoryBuffer {
    #[inline]
    fn from(messages: Vec<ModelMessage>) -> Self {
        Self(messages)
    }
}

impl<'a> IntoIterator for &'a HistoryBuffer {
    type Item = &'a ModelMessage;
    type IntoIter = std::slice::Iter<'a, ModelMessage>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
