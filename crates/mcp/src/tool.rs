use std::sync::Arc;
use std::time::Duration;

use mcp_chat_core::tool::{Error as ToolError, Tool, ToolResult};
use serde_json::{Map, Value, json};

use crate::Error;
use crate::connection::Connection;
use crate::protocol::{CallToolResult, ToolInfo};

/// How long a tool call may take unless the server config says otherwise.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// A tool offered by an MCP server.
///
/// Calls go through the server's connection; once the server is gone
/// they fail with an `Unavailable` tool error.
pub struct McpTool {
    name: String,
    description: String,
    schema: Value,
    connection: Arc<Connection>,
    timeout: Duration,
}

impl McpTool {
    pub(crate) fn new(
        info: ToolInfo,
        connection: Arc<Connection>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: info.name,
            description: info.description.unwrap_or_default(),
            schema: info.input_schema,
            connection,
            timeout,
        }
    }

    /// Returns the name of the server offering this tool.
    #[inline]
    pub fn server(&self) -> &str {
        self.connection.name()
    }
}

impl Tool for McpTool {
    type Input = Value;

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let connection = Arc::clone(&self.connection);
        let name = self.name.clone();
        let limit = self.timeout;
        let arguments = match input {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        async move {
            let params = json!({ "name": name, "arguments": arguments });
            let result = connection
                .request_with_timeout("tools/call", Some(params), limit)
                .await;
            let result = match result {
                Ok(result) => result,
                Err(Error::Closed) => {
                    return Err(ToolError::unavailable().with_reason(format!(
                        "server `{}` is not running",
                        connection.name()
                    )));
                }
                Err(err) => return Err(failed(err.to_string())),
            };

            let result: CallToolResult = serde_json::from_value(result)
                .map_err(|err| failed(err.to_string()))?;
            if result.is_error {
                return Err(failed(result.text()));
            }
            Ok(result.text())
        }
    }
}

#[inline]
fn failed(reason: String) -> ToolError {
    ToolError::execution_error().with_reason(reason)
}
