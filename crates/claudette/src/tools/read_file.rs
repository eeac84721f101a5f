use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::io::ErrorKind;

use super::{parse_arguments, ToolHandler};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

pub const NAME: &str = "read_file";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    file_path: String,
}

pub struct ReadFile;

#[async_trait]
impl ToolHandler for ReadFile {
    fn definition(&self) -> Tool {
        Tool::new(
            NAME,
            "Read the contents of a file",
            json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Path to the file to read"
                    }
                },
                "required": ["file_path"]
            }),
        )
    }

    async fn execute(&self, arguments: Map<String, Value>) -> AgentResult<String> {
        let params: Params = parse_arguments(NAME, arguments)?;
        let path = &params.file_path;

        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(format!("File content of {}:\n\n{}", path, content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AgentError::ExecutionError(
                format!("File '{}' not found.", path),
            )),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(AgentError::ExecutionError(
                format!("Permission denied to read '{}'.", path),
            )),
            Err(e) => Err(AgentError::ExecutionError(format!("Failed to read file: {}", e))),
        }
    }
}
