use include_dir::{include_dir, Dir};
use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

use crate::models::tool::Tool;

static PROMPTS: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/prompts");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

/// Render one of the templates embedded in the binary, e.g. `system.md`
pub fn load_prompt_file<T: Serialize>(name: &str, context_data: &T) -> Result<String, TeraError> {
    let template = PROMPTS
        .get_file(name)
        .and_then(|file| file.contents_utf8())
        .ok_or_else(|| TeraError::msg(format!("Unknown prompt template: {}", name)))?;
    load_prompt(template, context_data)
}

#[derive(Serialize)]
struct SystemPromptContext<'a> {
    date: String,
    working_dir: String,
    tools: &'a [Tool],
}

/// The default system prompt for a session offering `tools`
pub fn system_prompt(tools: &[Tool]) -> Result<String, TeraError> {
    let working_dir = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_string());
    let context = SystemPromptContext {
        date: chrono::Local::now().format("%A, %B %d, %Y").to_string(),
        working_dir,
        tools,
    };
    load_prompt_file("system.md", &context)
}

#[derive(Serialize)]
struct RepromptContext<'a> {
    system_prompt: &'a str,
}

/// Instructions for rewriting a user message, given the prompt of the model that will answer it
pub fn reprompt_instructions(system_prompt: &str) -> Result<String, TeraError> {
    load_prompt_file("reprompt.md", &RepromptContext { system_prompt })
}

#[derive(Serialize)]
struct InitContext<'a> {
    file_name: &'a str,
}

/// Instructions asking the model to document the current project in `file_name`
pub fn init_instructions(file_name: &str) -> Result<String, TeraError> {
    load_prompt_file("init.md", &InitContext { file_name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_load_prompt() {
        let template = "Hello, {{ name }}! You are {{ age }} years old.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Alice".to_string());
        context.insert("age".to_string(), 30.to_string());

        let result = load_prompt(template, &context).unwrap();
        assert_eq!(result, "Hello, Alice! You are 30 years old.");
    }

    #[test]
    fn test_load_prompt_missing_variable() {
        let template = "Hello, {{ name }}! You are {{ age }} years old.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Alice".to_string());
        let result = load_prompt(template, &context);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_template() {
        let context: HashMap<String, String> = HashMap::new();
        assert!(load_prompt_file("missing.md", &context).is_err());
    }

    #[test]
    fn test_system_prompt_lists_tools() {
        let tools = vec![Tool::new(
            "read_file",
            "Read the contents of a file",
            json!({"type": "object"}),
        )];
        let prompt = system_prompt(&tools).unwrap();
        assert!(prompt.contains("- `read_file`: Read the contents of a file"));
        assert!(prompt.contains("function-calling interface"));

        let prompt = system_prompt(&[]).unwrap();
        assert!(prompt.contains("No tools are available"));
    }

    #[test]
    fn test_reprompt_instructions_embed_system_prompt() {
        let prompt = reprompt_instructions("You only answer in haiku.").unwrap();
        assert!(prompt.contains("You only answer in haiku."));
        assert!(prompt.contains("Return only the rewritten message"));
    }

    #[test]
    fn test_init_instructions_name_the_file() {
        let prompt = init_instructions("AGENTS.md").unwrap();
        assert!(prompt.starts_with("Write a `AGENTS.md` file"));
        assert!(prompt.contains("## Code Map"));
        assert!(!prompt.contains("{{"));
    }
}
