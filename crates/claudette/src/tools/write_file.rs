use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use super::{parse_arguments, Confirmation, ToolHandler};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

pub const NAME: &str = "write_file";
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    file_path: String,
    content: String,
}

pub struct WriteFile {
    confirmation: Arc<Confirmation>,
}

impl WriteFile {
    pub fn new(confirmation: Arc<Confirmation>) -> Self {
        Self { confirmation }
    }
}

/// The first characters of `content`, marked when cut
pub(crate) fn preview(content: &str, limit: usize) -> String {
    if content.chars().count() > limit {
        format!("{}...", content.chars().take(limit).collect::<String>())
    } else {
        content.to_string()
    }
}

#[async_trait]
impl ToolHandler for WriteFile {
    fn definition(&self) -> Tool {
        Tool::new(
            NAME,
            "Write content to a file (creates or overwrites)",
            json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Path to the file to write"
                    },
                    "content": {
                        "type": "string",
                        "description": "Content to write to the file"
                    }
                },
                "required": ["file_path", "content"]
            }),
        )
    }

    async fn execute(&self, arguments: Map<String, Value>) -> AgentResult<String> {
        let params: Params = parse_arguments(NAME, arguments)?;
        let path = Path::new(&params.file_path);

        let verb = if path.exists() { "Overwrite" } else { "Create" };
        let action = format!("{} file: {}", verb, params.file_path);
        let details = [(
            "Content".to_string(),
            preview(&params.content, PREVIEW_CHARS),
        )];
        if !self.confirmation.check("📝", &action, &details) {
            return Err(AgentError::Cancelled("File write cancelled by user.".into()));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::ExecutionError(format!("Failed to write file: {}", e)))?;
        }

        match tokio::fs::write(path, &params.content).await {
            Ok(()) => Ok(format!("Successfully wrote to '{}'.", params.file_path)),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(AgentError::ExecutionError(
                format!("Permission denied to write to '{}'.", params.file_path),
            )),
            Err(e) => Err(AgentError::ExecutionError(format!("Failed to write file: {}", e))),
        }
    }
}
