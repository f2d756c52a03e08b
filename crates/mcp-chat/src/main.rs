//! Terminal chat with an MCP-backed agent.

#[macro_use]
extern crate tracing;

use std::process::ExitCode;

use mcp_chat::cli::{self, ChatLoop};
use mcp_chat::{AgentSession, SessionConfig};
use owo_colors::OwoColorize;
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = SessionConfig::from_env();
    debug!("starting with {config:?}");

    let session = match AgentSession::initialize(&config).await {
        Ok(session) => session,
        Err(err) => {
            eprintln!("{} {err}", "Failed to initialize MCP Agent:".red());
            return Ok(ExitCode::FAILURE);
        }
    };

    let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while signal::ctrl_c().await.is_ok() {
            if interrupt_tx.send(()).is_err() {
                break;
            }
        }
    });

    let mut chat = ChatLoop::new(
        &session,
        cli::stdin_lines(),
        std::io::stdout(),
        interrupt_rx,
    )
    .with_spinner(true);
    let exit = chat.run().await?;
    debug!("chat loop ended: {exit:?}");

    Ok(ExitCode::SUCCESS)
}
