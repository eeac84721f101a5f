use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{parse_arguments, QuestionPrompt, ToolHandler};
use crate::errors::AgentResult;
use crate::models::tool::Tool;

pub const NAME: &str = "ask_user";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    question: String,
    #[serde(default)]
    context: Option<String>,
}

pub struct AskUser {
    prompt: Arc<dyn QuestionPrompt>,
}

impl AskUser {
    pub fn new(prompt: Arc<dyn QuestionPrompt>) -> Self {
        Self { prompt }
    }
}

#[async_trait]
impl ToolHandler for AskUser {
    fn definition(&self) -> Tool {
        Tool::new(
            NAME,
            "Ask the user a question when you need clarification or additional information. Use this when you're unsure about something or need the user to make a choice.",
            json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The question to ask the user"
                    },
                    "context": {
                        "type": "string",
                        "description": "Optional context explaining why you're asking this question"
                    }
                },
                "required": ["question"]
            }),
        )
    }

    async fn execute(&self, arguments: Map<String, Value>) -> AgentResult<String> {
        let params: Params = parse_arguments(NAME, arguments)?;
        let answer = self
            .prompt
            .ask(&params.question, params.context.as_deref().filter(|c| !c.is_empty()));

        Ok(match answer.as_deref().map(str::trim) {
            Some(answer) if !answer.is_empty() => format!("User's response: {}", answer),
            _ => "User provided no answer.".to_string(),
        })
    }
}
