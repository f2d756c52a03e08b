use std::path::PathBuf;
use std::time::Duration;

use mcp_chat_openai_model::{
    DEFAULT_BASE_URL, DEFAULT_MODEL, OpenAIConfig, OpenAIConfigBuilder,
};

const DEFAULT_API_KEY: &str = "ollama";
const DEFAULT_MCP_CONFIG: &str = "mcp_config.json";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_STREAM_DELAY: Duration = Duration::from_millis(50);

/// Process-wide settings, read once at start-up.
///
/// | variable                   | default                     |
/// |----------------------------|-----------------------------|
/// | `OPENAI_BASE_URL`          | `http://localhost:11434/v1` |
/// | `OPENAI_MODEL`             | `qwen2.5`                   |
/// | `OPENAI_API_KEY`           | `ollama`                    |
/// | `MCP_CONFIG`               | `mcp_config.json`           |
/// | `MCP_CHAT_ADDR`            | `127.0.0.1:8000`            |
/// | `MCP_CHAT_STREAM_DELAY_MS` | `50`                        |
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Bearer token; local servers ignore it.
    pub api_key: String,
    /// Path of the tool server definitions.
    pub mcp_config: PathBuf,
    /// Address the web UI listens on.
    pub listen_addr: String,
    /// Pause before each line streamed to the web UI.
    pub stream_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            api_key: DEFAULT_API_KEY.to_owned(),
            mcp_config: PathBuf::from(DEFAULT_MCP_CONFIG),
            listen_addr: DEFAULT_LISTEN_ADDR.to_owned(),
            stream_delay: DEFAULT_STREAM_DELAY,
        }
    }
}

impl SessionConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Load a `.env` file first if one should apply.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`. Unset and empty values
    /// fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key).filter(|value| !value.trim().is_empty())
        };
        let defaults = Self::default();

        let stream_delay = match get("MCP_CHAT_STREAM_DELAY_MS") {
            Some(value) => match value.trim().parse() {
                Ok(millis) => Duration::from_millis(millis),
                Err(err) => {
                    warn!("ignoring MCP_CHAT_STREAM_DELAY_MS={value:?}: {err}");
                    defaults.stream_delay
                }
            },
            None => defaults.stream_delay,
        };

        Self {
            base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            model: get("OPENAI_MODEL").unwrap_or(defaults.model),
            api_key: get("OPENAI_API_KEY").unwrap_or(defaults.api_key),
            mcp_config: get("MCP_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.mcp_config),
            listen_addr: get("MCP_CHAT_ADDR").unwrap_or(defaults.listen_addr),
            stream_delay,
        }
    }

    /// Returns the model provider configuration.
    pub fn openai_config(&self) -> OpenAIConfig {
        OpenAIConfigBuilder::with_api_key(&self.api_key)
            .with_base_url(&self.base_url)
            .with_model(&self.model)
            .build()
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("mcp_config", &self.mcp_config)
            .field("listen_addr", &self.listen_addr)
            .field("stream_delay", &self.stream_delay)
            .finish()
    }
}
