use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_TOOL_TIMEOUT, Error};

/// Tool server definitions, in the `mcpServers` format shared by most
/// MCP hosts.
///
/// ```json
/// {
///   "mcpServers": {
///     "files": {
///       "command": "npx",
///       "args": ["-y", "@modelcontextprotocol/server-filesystem", "."],
///       "toolTimeout": 600
///     }
///   }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpConfig {
    /// Servers by name. Servers start in name order.
    #[serde(rename = "mcpServers", default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

/// How to launch one tool server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The program to run.
    pub command: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Seconds a single tool call may take.
    #[serde(
        rename = "toolTimeout",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_timeout: Option<u64>,
}

impl ServerConfig {
    /// Returns the tool call limit, [`DEFAULT_TOOL_TIMEOUT`] unless set.
    pub fn tool_timeout(&self) -> Duration {
        self.tool_timeout
            .map_or(DEFAULT_TOOL_TIMEOUT, Duration::from_secs)
    }
}

impl McpConfig {
    /// Reads the configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
                path: path.to_owned(),
                source,
            })?;
        Self::parse(&text)
    }

    /// Parses the configuration from JSON text.
    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(Error::InvalidConfig)
    }
}
