use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A provider-specific message that the agent stores but never reads.
///
/// Some providers need more than plain text to continue a conversation,
/// e.g. the complete assistant message carrying its tool call ids. The
/// provider packs such a message into an `OpaqueMessage`, the agent keeps
/// it in the history as is, and the provider unpacks it again when the
/// history is sent back.
///
/// The payload is plain JSON, so histories holding opaque messages stay
/// serializable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpaqueMessage {
    id: String,
    payload: Value,
}

impl OpaqueMessage {
    /// Creates a new `OpaqueMessage` from a raw JSON payload.
    ///
    /// The `id` should be unique across the conversation.
    #[inline]
    pub fn new<ID: Into<String>>(id: ID, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Packs a provider type into an `OpaqueMessage`.
    pub fn from_raw<ID: Into<String>, T: Serialize>(
        id: ID,
        raw: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(id, serde_json::to_value(raw)?))
    }

    /// Unpacks the payload into a provider type.
    ///
    /// Returns `None` if the payload was produced by someone else and
    /// doesn't have the expected shape.
    #[inline]
    pub fn to_raw<T: DeserializeOwned>(&self) -> Option<T> {
        T::deserialize(&self.payload).ok()
    }

    /// Returns the id of this message.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the raw JSON payload.
    #[inline]
    pub fn payload(&self) -> &Value {
        &self.payload
    }
}
