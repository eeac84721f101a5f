use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
}

impl Usage {
    pub fn new(input_tokens: Option<i32>, output_tokens: Option<i32>) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

/// Generation options for a single streamed pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    /// Hard ceiling on generated tokens for the pass
    pub max_tokens: Option<u32>,
    /// Ask the backend to expose its reasoning on the thinking channel
    pub think: bool,
}

/// One increment of a streamed chat response.
///
/// Any field may be empty. Tool calls arrive complete, in a single chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChunk {
    pub content: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCall>,
    pub done: bool,
    pub usage: Option<Usage>,
}

impl ChatChunk {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            content: text.into(),
            ..Default::default()
        }
    }

    pub fn thinking<S: Into<String>>(thinking: S) -> Self {
        Self {
            thinking: thinking.into(),
            ..Default::default()
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Default::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }
}

pub type ChatStream = BoxStream<'static, Result<ChatChunk>>;

/// A model installed on the backend
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    /// Size on disk in bytes
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<String>,
}

/// One status update while the backend downloads a model
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
}

pub type PullStream = BoxStream<'static, Result<PullProgress>>;

/// A streaming chat backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start a streamed completion of `messages`, offering `tools` to the model.
    ///
    /// Transport and model errors are returned either here or as an `Err` item
    /// of the stream; the response loop propagates both.
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Tool],
        options: &ChatOptions,
    ) -> Result<ChatStream>;

    /// Models the backend can serve
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Err(anyhow!("This backend cannot list its models"))
    }

    /// Download `model`, reporting progress as the stream advances
    async fn pull_model(&self, _model: &str) -> Result<PullStream> {
        Err(anyhow!("This backend cannot download models"))
    }

    /// Release the memory `model` holds on the backend
    async fn unload_model(&self, _model: &str) -> Result<()> {
        Err(anyhow!("This backend cannot unload models"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_serialization() -> Result<()> {
        let usage = Usage::new(Some(10), Some(20));
        let serialized = serde_json::to_string(&usage)?;
        let deserialized: Usage = serde_json::from_str(&serialized)?;
        assert_eq!(usage, deserialized);

        let json_value: serde_json::Value = serde_json::from_str(&serialized)?;
        assert_eq!(json_value["input_tokens"], json!(10));
        assert_eq!(json_value["output_tokens"], json!(20));
        Ok(())
    }

    #[test]
    fn test_chunk_constructors() {
        assert_eq!(ChatChunk::text("hi").content, "hi");
        assert_eq!(ChatChunk::thinking("hmm").thinking, "hmm");
        assert!(ChatChunk::done().done);
        assert!(ChatChunk::tool_calls(vec![]).tool_calls.is_empty());
    }
}
