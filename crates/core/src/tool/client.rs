use std::error::Error as StdError;

use async_trait::async_trait;

use super::ToolSet;

/// The error type of [`ToolClient`] operations.
pub type ToolClientError = Box<dyn StdError + Send + Sync + 'static>;

/// A source of tools that owns external resources, such as tool server
/// processes.
///
/// A client is started once and cleaned up once. The tools it hands out
/// stop working after cleanup.
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Connects to the tool sources and returns every tool they offer.
    ///
    /// On failure, anything already started must be released before
    /// returning.
    async fn start(&mut self) -> Result<ToolSet, ToolClientError>;

    /// Releases all resources held by the client.
    ///
    /// Calling this more than once, or without a successful
    /// [`start`](ToolClient::start), is allowed and does nothing.
    async fn cleanup(&mut self) -> Result<(), ToolClientError>;
}
