use std::time::Duration;

use super::ollama::{OLLAMA_HOST, OLLAMA_KEEP_ALIVE};

#[derive(Debug, Clone, PartialEq)]
pub struct OllamaProviderConfig {
    pub host: String,
    /// How long the backend keeps the model loaded between requests
    pub keep_alive: String,
    pub connect_timeout: Duration,
    /// Longest silence tolerated while waiting for a response or the next
    /// streamed chunk. Loading a large model counts as silence.
    pub idle_timeout: Duration,
}

impl OllamaProviderConfig {
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }
}

impl Default for OllamaProviderConfig {
    fn default() -> Self {
        Self {
            host: OLLAMA_HOST.to_string(),
            keep_alive: OLLAMA_KEEP_ALIVE.to_string(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
        }
    }
}
