use serde::{Deserialize, Serialize};

use super::role::Role;
use super::tool::ToolCall;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Base64 encoded images attached to a user message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            content: String::new(),
            tool_calls: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn system() -> Self {
        Self::new(Role::System)
    }

    pub fn user() -> Self {
        Self::new(Role::User)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// A tool result. Only the response loop creates these, right after the
    /// assistant message carrying the matching call.
    pub fn tool() -> Self {
        Self::new(Role::Tool)
    }

    /// Append text to the message content
    pub fn with_text<S: AsRef<str>>(mut self, text: S) -> Self {
        self.content.push_str(text.as_ref());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls.extend(tool_calls);
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images.extend(images);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn test_persisted_shape() {
        let message = Message::assistant().with_tool_calls(vec![ToolCall::new(
            "read_file",
            Map::from_iter([("file_path".to_string(), json!("a.txt"))]),
        )]);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "read_file", "arguments": {"file_path": "a.txt"}}}]
            })
        );
    }

    #[test]
    fn test_empty_collections_are_omitted() {
        let value = serde_json::to_value(Message::user().with_text("hi")).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_deserialize_without_content() {
        let message: Message = serde_json::from_value(json!({"role": "tool"})).unwrap();
        assert_eq!(message.role, Role::Tool);
        assert!(message.content.is_empty());
    }
}
