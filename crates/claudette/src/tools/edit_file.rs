use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use similar::TextDiff;
use std::io::ErrorKind;
use std::sync::Arc;

use super::{parse_arguments, Confirmation, ToolHandler};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

pub const NAME: &str = "edit_file";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    file_path: String,
    old_content: String,
    new_content: String,
}

pub struct EditFile {
    confirmation: Arc<Confirmation>,
}

impl EditFile {
    pub fn new(confirmation: Arc<Confirmation>) -> Self {
        Self { confirmation }
    }
}

/// Unified diff with `a/` and `b/` headers, empty when nothing changed
pub fn unified_diff(old: &str, new: &str, file_path: &str) -> String {
    if old == new {
        return String::new();
    }
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", file_path), &format!("b/{}", file_path))
        .to_string()
}

#[async_trait]
impl ToolHandler for EditFile {
    fn definition(&self) -> Tool {
        Tool::new(
            NAME,
            "Edit a file by replacing specific content",
            json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Path to the file to edit"
                    },
                    "old_content": {
                        "type": "string",
                        "description": "Content to replace (must match exactly)"
                    },
                    "new_content": {
                        "type": "string",
                        "description": "New content to insert"
                    }
                },
                "required": ["file_path", "old_content", "new_content"]
            }),
        )
    }

    async fn execute(&self, arguments: Map<String, Value>) -> AgentResult<String> {
        let params: Params = parse_arguments(NAME, arguments)?;
        let path = &params.file_path;

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AgentError::ExecutionError(format!(
                    "File '{}' not found.",
                    path
                )))
            }
            Err(e) => {
                return Err(AgentError::ExecutionError(format!(
                    "Failed to edit file: {}",
                    e
                )))
            }
        };

        if params.old_content.is_empty() || !content.contains(&params.old_content) {
            return Err(AgentError::ExecutionError(format!(
                "Could not find the specified content in '{}'.",
                path
            )));
        }

        let updated = content.replacen(&params.old_content, &params.new_content, 1);
        let diff = unified_diff(&content, &updated, path);

        let action = format!("Edit file: {}", path);
        if !self
            .confirmation
            .check("✏️", &action, &[("Diff".to_string(), diff.clone())])
        {
            return Err(AgentError::Cancelled("File edit cancelled by user.".into()));
        }

        tokio::fs::write(path, &updated)
            .await
            .map_err(|e| AgentError::ExecutionError(format!("Failed to edit file: {}", e)))?;

        Ok(format!("Successfully edited '{}'.\n\nChanges:\n{}", path, diff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{args, confirmation};

    #[tokio::test]
    async fn test_edit_replaces_first_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.txt");
        std::fs::write(&path, "alpha\nbeta\nbeta\n").unwrap();
        let path_str = path.to_str().unwrap();
        let (confirmation, actions) = confirmation(true, true);

        let result = EditFile::new(confirmation)
            .execute(args(json!({
                "file_path": path_str,
                "old_content": "beta",
                "new_content": "gamma"
            })))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "alpha\ngamma\nbeta\n"
        );
        assert!(result.starts_with(&format!("Successfully edited '{}'.\n\nChanges:\n", path_str)));
        assert!(result.contains("-beta\n+gamma\n"));
        assert_eq!(actions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_edit_missing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.txt");
        std::fs::write(&path, "alpha\n").unwrap();
        let path_str = path.to_str().unwrap();
        let (confirmation, actions) = confirmation(true, true);

        let error = EditFile::new(confirmation)
            .execute(args(json!({
                "file_path": path_str,
                "old_content": "omega",
                "new_content": "x"
            })))
            .await
            .unwrap_err();
        assert_eq!(
            error.to_tool_result(),
            format!("Error: Could not find the specified content in '{}'.", path_str)
        );
        assert!(actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.txt");
        std::fs::write(&path, "alpha\n").unwrap();
        let (confirmation, _) = confirmation(true, false);

        let error = EditFile::new(confirmation)
            .execute(args(json!({
                "file_path": path.to_str().unwrap(),
                "old_content": "alpha",
                "new_content": "beta"
            })))
            .await
            .unwrap_err();
        assert_eq!(error.to_tool_result(), "File edit cancelled by user.");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "alpha\n");
    }

    #[test]
    fn test_unified_diff_headers() {
        let diff = unified_diff("a\nb\n", "a\nc\n", "f.txt");
        assert!(diff.starts_with("--- a/f.txt\n+++ b/f.txt\n"));
        assert!(diff.contains("-b\n+c\n"));
        assert!(unified_diff("same", "same", "f.txt").is_empty());
    }
}
