use std::io;
use std::path::PathBuf;

/// Errors of the MCP client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    ReadConfig {
        /// Path of the file.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
    /// The configuration is not valid.
    #[error("invalid server configuration: {0}")]
    InvalidConfig(#[source] serde_json::Error),
    /// A server process could not be started.
    #[error("cannot start server `{server}`: {source}")]
    Spawn {
        /// Name of the server.
        server: String,
        /// The underlying error.
        source: io::Error,
    },
    /// A server failed during the handshake.
    #[error("server `{server}` failed to initialize: {source}")]
    Handshake {
        /// Name of the server.
        server: String,
        /// The underlying error.
        source: Box<Error>,
    },
    /// The connection to the server is gone.
    #[error("connection closed")]
    Closed,
    /// The server did not answer in time.
    #[error("`{0}` timed out")]
    Timeout(String),
    /// The server answered with a JSON-RPC error.
    #[error("server error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the server.
        message: String,
    },
    /// A message could not be encoded.
    #[error("cannot encode message: {0}")]
    Encode(#[from] serde_json::Error),
    /// The server answered with something unexpected.
    #[error("invalid response to `{method}`: {reason}")]
    InvalidResponse {
        /// The request method.
        method: String,
        /// What was wrong.
        reason: String,
    },
}
