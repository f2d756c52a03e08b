//! Browser chat with an MCP-backed agent.

#[macro_use]
extern crate tracing;

use std::sync::Arc;

use anyhow::Context as _;
use mcp_chat::SessionConfig;
use mcp_chat::web::ChatUi;
use mcp_chat::web::server::serve;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = SessionConfig::from_env();
    debug!("starting with {config:?}");

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("cannot listen on {}", config.listen_addr))?;
    let ui = Arc::new(ChatUi::new(config.clone(), config.stream_delay));

    serve(listener, ui).await.context("chat UI server failed")
}
