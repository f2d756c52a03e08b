use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::connection::Connection;
use crate::protocol::{InitializeResult, ListToolsResult, initialize_params};
use crate::tool::McpTool;
use crate::{Error, ServerConfig};

/// How long an exiting server may take after its stdin was closed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// A running tool server process.
pub struct ServerProcess {
    name: String,
    child: Child,
    connection: Arc<Connection>,
    tool_timeout: Duration,
    stderr_task: Option<JoinHandle<()>>,
}

impl ServerProcess {
    pub fn spawn(name: &str, config: &ServerConfig) -> Result<Self, Error> {
        let spawn_error = |source| Error::Spawn {
            server: name.to_owned(),
            source,
        };

        debug!(
            "starting server `{name}`: {} {:?}",
            config.command, config.args
        );
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let missing = |what: &str| {
            spawn_error(std::io::Error::other(format!("no {what} pipe")))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        // Servers log to stderr; keep it out of the terminal.
        let stderr_name = name.to_owned();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if !line.is_empty() {
                    debug!(target: "mcp_server", "[{stderr_name}] {line}");
                }
            }
        });

        Ok(Self {
            name: name.to_owned(),
            child,
            connection: Arc::new(Connection::new(name, stdout, stdin)),
            tool_timeout: config.tool_timeout(),
            stderr_task: Some(stderr_task),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Performs the handshake and returns the server's tools.
    pub async fn start(&self) -> Result<Vec<McpTool>, Error> {
        handshake(&self.connection).await?;
        list_tools(&self.connection, self.tool_timeout).await
    }

    /// Closes stdin, gives the process a moment to exit, then kills it.
    pub async fn shutdown(mut self) {
        self.connection.close().await;
        match timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("server `{}` exited: {status}", self.name),
            Ok(Err(err)) => {
                warn!("cannot wait for server `{}`: {err}", self.name);
            }
            Err(_) => {
                warn!("server `{}` did not exit, killing it", self.name);
                if let Err(err) = self.child.kill().await {
                    error!("cannot kill server `{}`: {err}", self.name);
                }
            }
        }
        if let Some(stderr_task) = self.stderr_task.take() {
            stderr_task.abort();
        }
    }
}

fn parse<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|err| Error::InvalidResponse {
        method: method.to_owned(),
        reason: err.to_string(),
    })
}

pub async fn handshake(connection: &Connection) -> Result<(), Error> {
    let result = connection
        .request("initialize", Some(initialize_params()))
        .await?;
    let result: InitializeResult = parse("initialize", result)?;
    if result.protocol_version != crate::PROTOCOL_VERSION {
        debug!(
            "[{}] server speaks protocol {:?}",
            connection.name(),
            result.protocol_version
        );
    }
    if let Some(info) = &result.server_info {
        info!("connected to {} {}", info.name, info.version);
    }
    connection.notify("notifications/initialized", None)
}

pub async fn list_tools(
    connection: &Arc<Connection>,
    tool_timeout: Duration,
) -> Result<Vec<McpTool>, Error> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let params =
            cursor.as_ref().map(|cursor| json!({ "cursor": cursor }));
        let result = connection.request("tools/list", params).await?;
        let page: ListToolsResult = parse("tools/list", result)?;
        tools.extend(page.tools.into_iter().map(|info| {
            McpTool::new(info, Arc::clone(connection), tool_timeout)
        }));
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    info!("[{}] {} tools available", connection.name(), tools.len());
    Ok(tools)
}
