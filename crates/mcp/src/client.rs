use std::path::Path;

use async_trait::async_trait;
use mcp_chat_core::tool::{ToolClient, ToolClientError, ToolSet};

use crate::server::ServerProcess;
use crate::{Error, McpConfig};

/// Starts the configured tool servers and collects their tools.
///
/// Every server runs as a child process for as long as the client is
/// started. [`ToolClient::cleanup`] stops them; dropping the client kills
/// any that are left.
#[derive(Default)]
pub struct McpClient {
    config: McpConfig,
    servers: Vec<ServerProcess>,
}

impl McpClient {
    /// Creates a client without servers.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client for the given servers.
    #[inline]
    pub fn with_config(config: McpConfig) -> Self {
        Self {
            config,
            servers: Vec::new(),
        }
    }

    /// Loads the server definitions from a JSON file, replacing any
    /// loaded before.
    pub fn load_servers(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<(), Error> {
        self.config = McpConfig::load(path)?;
        debug!("loaded {} server definitions", self.config.servers.len());
        Ok(())
    }

    /// Returns the loaded configuration.
    #[inline]
    pub fn config(&self) -> &McpConfig {
        &self.config
    }

    /// Returns the number of running servers.
    #[inline]
    pub fn running_servers(&self) -> usize {
        self.servers.len()
    }

    async fn start_servers(&mut self) -> Result<ToolSet, Error> {
        let mut tools = ToolSet::new();
        for (name, server_config) in &self.config.servers {
            let server = ServerProcess::spawn(name, server_config)?;
            // Tracked before the handshake so a failure still stops it.
            self.servers.push(server);
            let Some(server) = self.servers.last() else {
                continue;
            };
            let server_tools =
                server.start().await.map_err(|err| Error::Handshake {
                    server: server.name().to_owned(),
                    source: Box::new(err),
                })?;
            for tool in server_tools {
                tools.add(tool);
            }
        }
        Ok(tools)
    }

    async fn stop_servers(&mut self) {
        for server in self.servers.drain(..) {
            let name = server.name().to_owned();
            server.shutdown().await;
            debug!("server `{name}` stopped");
        }
    }
}

#[async_trait]
impl ToolClient for McpClient {
    async fn start(&mut self) -> Result<ToolSet, ToolClientError> {
        if !self.servers.is_empty() {
            warn!("tool servers already started, restarting them");
            self.stop_servers().await;
        }
        match self.start_servers().await {
            Ok(tools) => {
                info!(
                    "started {} servers with {} tools",
                    self.servers.len(),
                    tools.len()
                );
                Ok(tools)
            }
            Err(err) => {
                error!("failed to start tool servers: {err}");
                self.stop_servers().await;
                Err(err.into())
            }
        }
    }

    async fn cleanup(&mut self) -> Result<(), ToolClientError> {
        self.stop_servers().await;
        Ok(())
    }
}
