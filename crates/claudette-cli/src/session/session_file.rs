use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use claudette::models::message::Message;

pub const CONVERSATIONS_DIR: &str = ".claudette/conversations";
const EXTENSION: &str = "yaml";

/// Saved conversations live next to the project, not in the home directory
pub fn conversations_dir() -> PathBuf {
    PathBuf::from(CONVERSATIONS_DIR)
}

/// `name.yaml` for a given name, or a timestamped default
pub fn conversation_file_name(name: Option<&str>) -> String {
    match name {
        Some(name) if name.ends_with(".yaml") => name.to_string(),
        Some(name) => format!("{}.{}", name, EXTENSION),
        None => format!(
            "conversation_{}.{}",
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            EXTENSION
        ),
    }
}

pub fn save_conversation(dir: &Path, name: Option<&str>, messages: &[Message]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(conversation_file_name(name));
    let yaml = serde_yaml::to_string(messages)?;
    fs::write(&path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

pub fn load_conversation(dir: &Path, name: &str) -> Result<Vec<Message>> {
    let path = dir.join(conversation_file_name(Some(name)));
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    let yaml = fs::read_to_string(&path)?;
    let messages: Vec<Message> = serde_yaml::from_str(&yaml)
        .with_context(|| format!("Invalid YAML file: {}", path.display()))?;
    Ok(messages)
}

/// A saved conversation, as shown by `/conversations`
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationEntry {
    pub name: String,
    pub modified: chrono::DateTime<chrono::Local>,
    pub size: u64,
}

/// Saved conversations, most recently modified first
pub fn list_conversations(dir: &Path) -> Result<Vec<ConversationEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            continue;
        }
        let metadata = entry.metadata()?;
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        entries.push(ConversationEntry {
            name: name.to_string(),
            modified: metadata.modified()?.into(),
            size: metadata.len(),
        });
    }
    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use claudette::models::tool::ToolCall;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_messages() -> Vec<Message> {
        let arguments = match json!({"file_path": "a.txt"}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        vec![
            Message::system().with_text("You are helpful."),
            Message::user().with_text("Read a.txt"),
            Message::assistant().with_tool_calls(vec![ToolCall::new("read_file", arguments)]),
            Message::tool().with_text("File content of a.txt:\n\nhello"),
            Message::assistant().with_text("It says hello."),
        ]
    }

    #[test]
    fn test_file_names() {
        assert_eq!(conversation_file_name(Some("work")), "work.yaml");
        assert_eq!(conversation_file_name(Some("work.yaml")), "work.yaml");
        let generated = conversation_file_name(None);
        assert!(generated.starts_with("conversation_"));
        assert!(generated.ends_with(".yaml"));
        // conversation_YYYYMMDD_HHMMSS.yaml
        assert_eq!(generated.len(), "conversation_".len() + 15 + ".yaml".len());
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let dir = tempdir()?;
        let conversations = dir.path().join("conversations");
        let messages = sample_messages();

        let path = save_conversation(&conversations, Some("demo"), &messages)?;
        assert_eq!(path, conversations.join("demo.yaml"));

        let loaded = load_conversation(&conversations, "demo")?;
        assert_eq!(loaded, messages);
        Ok(())
    }

    #[test]
    fn test_tool_calls_persist_as_function_objects() -> Result<()> {
        let dir = tempdir()?;
        let path = save_conversation(dir.path(), Some("calls"), &sample_messages())?;
        let yaml = fs::read_to_string(path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml)?;

        let call = &value[2]["tool_calls"][0]["function"];
        assert_eq!(call["name"], serde_yaml::Value::from("read_file"));
        assert_eq!(call["arguments"]["file_path"], serde_yaml::Value::from("a.txt"));
        Ok(())
    }

    #[test]
    fn test_load_string_arguments() -> Result<()> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("old.yaml"),
            "- role: assistant\n  content: ''\n  tool_calls:\n  - function:\n      name: read_file\n      arguments: '{\"file_path\": \"a.txt\"}'\n",
        )?;

        let loaded = load_conversation(dir.path(), "old")?;
        assert_eq!(loaded[0].tool_calls[0].name(), "read_file");
        assert_eq!(loaded[0].tool_calls[0].arguments()["file_path"], json!("a.txt"));
        Ok(())
    }

    #[test]
    fn test_load_errors() -> Result<()> {
        let dir = tempdir()?;
        let missing = load_conversation(dir.path(), "nope").unwrap_err();
        assert!(missing.to_string().starts_with("File not found"));

        fs::write(dir.path().join("broken.yaml"), "role: [unclosed")?;
        let broken = load_conversation(dir.path(), "broken").unwrap_err();
        assert!(broken.to_string().starts_with("Invalid YAML file"));
        Ok(())
    }

    #[test]
    fn test_list_conversations() -> Result<()> {
        let dir = tempdir()?;
        assert!(list_conversations(&dir.path().join("missing"))?.is_empty());

        save_conversation(dir.path(), Some("first"), &sample_messages())?;
        save_conversation(dir.path(), Some("second"), &sample_messages())?;
        fs::write(dir.path().join("notes.txt"), "ignored")?;

        let mut names: Vec<String> = list_conversations(dir.path())?
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["first", "second"]);
        Ok(())
    }
}
