use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use super::base::{ChatChunk, PullProgress, Usage};
use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
}

/// Convert internal messages to the Ollama chat message format
pub fn messages_to_ollama_spec(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let mut converted = json!({
                "role": message.role,
                "content": message.content,
            });

            if !message.tool_calls.is_empty() {
                let tool_calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "function": {
                                "name": sanitize_function_name(call.name()),
                                "arguments": call.arguments(),
                            }
                        })
                    })
                    .collect();
                converted["tool_calls"] = json!(tool_calls);
            }

            if !message.images.is_empty() {
                converted["images"] = json!(message.images);
            }

            converted
        })
        .collect()
}

/// Convert internal tools to the function-calling declaration list
pub fn tools_to_ollama_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }
        result.push(tool.to_spec());
    }

    Ok(result)
}

fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<i32>,
    #[serde(default)]
    eval_count: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

/// Decode one line of the newline-delimited chat stream.
///
/// Blank lines yield `None`. An `error` field in the stream is a backend failure.
pub fn parse_stream_line(line: &str) -> Result<Option<ChatChunk>, ProviderError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let parsed: StreamLine =
        serde_json::from_str(line).map_err(|e| ProviderError::Decode(e.to_string()))?;

    if let Some(error) = parsed.error {
        return Err(ProviderError::Server(error));
    }

    let message = parsed.message.unwrap_or_default();
    let usage = if parsed.done {
        Some(Usage::new(parsed.prompt_eval_count, parsed.eval_count))
    } else {
        None
    };

    Ok(Some(ChatChunk {
        content: message.content.unwrap_or_default(),
        thinking: message.thinking.unwrap_or_default(),
        tool_calls: message.tool_calls.unwrap_or_default(),
        done: parsed.done,
        usage,
    }))
}

#[derive(Debug, Deserialize)]
struct PullLine {
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    progress: PullProgress,
}

/// Decode one line of a model download stream
pub fn parse_pull_line(line: &str) -> Result<Option<PullProgress>, ProviderError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let parsed: PullLine =
        serde_json::from_str(line).map_err(|e| ProviderError::Decode(e.to_string()))?;
    match parsed.error {
        Some(error) => Err(ProviderError::Server(error)),
        None => Ok(Some(parsed.progress)),
    }
}

/// Reassembles lines from a byte stream whose chunk boundaries are arbitrary
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Add bytes and return every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    /// Whatever is left once the stream ends without a trailing newline
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(rest)
    }
}
