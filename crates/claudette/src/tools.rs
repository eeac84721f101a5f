//! The fixed tool set the model may call, and the registry that dispatches calls by name.
//!
//! Every tool returns a plain string. Failures are turned into strings at the
//! registry boundary so the model can read them and correct itself.

pub mod ask_user;
pub mod edit_file;
pub mod execute_command;
pub mod get_time;
pub mod list_directory;
pub mod read_file;
pub mod web_search;
pub mod write_file;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;
use web_search::SearchEndpoints;

pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Asks the user whether a side-effecting action may proceed
pub trait ConfirmationGate: Send + Sync {
    /// `details` are label/value pairs shown under the action, e.g. a content preview or a diff
    fn confirm(&self, icon: &str, action: &str, details: &[(String, String)]) -> bool;
}

/// Allows everything without asking
pub struct AutoApprove;

impl ConfirmationGate for AutoApprove {
    fn confirm(&self, _icon: &str, _action: &str, _details: &[(String, String)]) -> bool {
        true
    }
}

/// Refuses everything without asking
pub struct AutoDeny;

impl ConfirmationGate for AutoDeny {
    fn confirm(&self, _icon: &str, _action: &str, _details: &[(String, String)]) -> bool {
        false
    }
}

/// The global confirmation switch plus the gate consulted when it is on.
///
/// Shared between the registry and the session so the switch can be flipped
/// while tools hold a reference.
pub struct Confirmation {
    required: AtomicBool,
    gate: Box<dyn ConfirmationGate>,
}

impl Confirmation {
    pub fn new(required: bool, gate: Box<dyn ConfirmationGate>) -> Self {
        Self {
            required: AtomicBool::new(required),
            gate,
        }
    }

    pub fn is_required(&self) -> bool {
        self.required.load(Ordering::SeqCst)
    }

    pub fn set_required(&self, required: bool) {
        self.required.store(required, Ordering::SeqCst);
    }

    /// True when the action may proceed
    pub fn check(&self, icon: &str, action: &str, details: &[(String, String)]) -> bool {
        if !self.is_required() {
            return true;
        }
        self.gate.confirm(icon, action, details)
    }
}

/// Asks the user a free-form question on behalf of the model
pub trait QuestionPrompt: Send + Sync {
    /// The answer, or `None` when the user gave none
    fn ask(&self, question: &str, context: Option<&str>) -> Option<String>;
}

/// For sessions without an interactive user
pub struct NoAnswer;

impl QuestionPrompt for NoAnswer {
    fn ask(&self, _question: &str, _context: Option<&str>) -> Option<String> {
        None
    }
}

/// Shared collaborators handed to every builtin tool
#[derive(Clone)]
pub struct ToolContext {
    pub confirmation: Arc<Confirmation>,
    pub questions: Arc<dyn QuestionPrompt>,
    /// Client with the browser User-Agent used for searches and page fetches
    pub http: reqwest::Client,
    pub search: SearchEndpoints,
    pub command_timeout: Duration,
}

impl ToolContext {
    pub fn new(confirmation: Arc<Confirmation>, questions: Arc<dyn QuestionPrompt>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            confirmation,
            questions,
            http,
            search: SearchEndpoints::default(),
            command_timeout: COMMAND_TIMEOUT,
        })
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> Tool;

    async fn execute(&self, arguments: Map<String, Value>) -> AgentResult<String>;
}

/// Deserialize call arguments into a tool's typed parameters
pub(crate) fn parse_arguments<P: DeserializeOwned>(
    tool: &str,
    arguments: Map<String, Value>,
) -> AgentResult<P> {
    serde_json::from_value(Value::Object(arguments)).map_err(|e| AgentError::invalid(tool, e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum BuiltinTool {
    AskUser,
    WebSearch,
    ReadFile,
    WriteFile,
    EditFile,
    ExecuteCommand,
    GetCurrentTime,
    ListDirectory,
}

impl BuiltinTool {
    pub fn build(self, context: &ToolContext) -> Box<dyn ToolHandler> {
        match self {
            BuiltinTool::AskUser => Box::new(ask_user::AskUser::new(context.questions.clone())),
            BuiltinTool::WebSearch => Box::new(web_search::WebSearch::new(
                context.http.clone(),
                context.search.clone(),
            )),
            BuiltinTool::ReadFile => Box::new(read_file::ReadFile),
            BuiltinTool::WriteFile => {
                Box::new(write_file::WriteFile::new(context.confirmation.clone()))
            }
            BuiltinTool::EditFile => Box::new(edit_file::EditFile::new(context.confirmation.clone())),
            BuiltinTool::ExecuteCommand => Box::new(execute_command::ExecuteCommand::new(
                context.confirmation.clone(),
                context.command_timeout,
            )),
            BuiltinTool::GetCurrentTime => Box::new(get_time::GetCurrentTime),
            BuiltinTool::ListDirectory => Box::new(list_directory::ListDirectory),
        }
    }
}

struct RegisteredTool {
    definition: Tool,
    handler: Box<dyn ToolHandler>,
}

/// Named tools in registration order
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    confirmation: Arc<Confirmation>,
}

impl ToolRegistry {
    pub fn new(confirmation: Arc<Confirmation>) -> Self {
        Self {
            tools: Vec::new(),
            confirmation,
        }
    }

    /// A registry holding every builtin tool
    pub fn builtin(context: &ToolContext) -> Self {
        let mut registry = Self::new(context.confirmation.clone());
        for tool in BuiltinTool::iter() {
            registry.register(tool.build(context));
        }
        registry
    }

    /// Add a tool. A tool with the same name replaces the earlier one.
    pub fn register(&mut self, handler: Box<dyn ToolHandler>) {
        let definition = handler.definition();
        self.tools.retain(|t| t.definition.name != definition.name);
        self.tools.push(RegisteredTool {
            definition,
            handler,
        });
    }

    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.definition.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn require_confirmation(&self) -> bool {
        self.confirmation.is_required()
    }

    pub fn set_require_confirmation(&self, required: bool) {
        self.confirmation.set_required(required);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.definition.name == name)
    }

    /// Run a tool by name. Never fails: errors come back as the result string.
    pub async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> String {
        let Some(tool) = self.tools.iter().find(|t| t.definition.name == name) else {
            tracing::debug!(tool = name, "model called an unknown tool");
            return AgentError::ToolNotFound(name.to_string()).to_tool_result();
        };

        tracing::debug!(tool = name, "executing tool");
        match tool.handler.execute(arguments.clone()).await {
            Ok(result) => result,
            Err(error) => {
                tracing::debug!(tool = name, %error, "tool returned an error");
                error.to_tool_result()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Gate that records every request and answers with a fixed decision
    pub struct RecordingGate {
        pub answer: bool,
        pub actions: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingGate {
        pub fn new(answer: bool) -> (Self, Arc<Mutex<Vec<String>>>) {
            let actions = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    answer,
                    actions: actions.clone(),
                },
                actions,
            )
        }
    }

    impl ConfirmationGate for RecordingGate {
        fn confirm(&self, _icon: &str, action: &str, _details: &[(String, String)]) -> bool {
            self.actions.lock().unwrap().push(action.to_string());
            self.answer
        }
    }

    pub fn confirmation(required: bool, answer: bool) -> (Arc<Confirmation>, Arc<Mutex<Vec<String>>>) {
        let (gate, actions) = RecordingGate::new(answer);
        (Arc::new(Confirmation::new(required, Box::new(gate))), actions)
    }

    pub fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{args, confirmation};
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn registry() -> ToolRegistry {
        let (confirmation, _) = confirmation(true, true);
        let context = ToolContext::new(confirmation, Arc::new(NoAnswer)).unwrap();
        ToolRegistry::builtin(&context)
    }

    #[test]
    fn test_builtin_names() {
        let names = registry().names();
        assert_eq!(
            names,
            vec![
                "ask_user",
                "web_search",
                "read_file",
                "write_file",
                "edit_file",
                "execute_command",
                "get_current_time",
                "list_directory"
            ]
        );
        assert_eq!(BuiltinTool::from_str("get_current_time").unwrap(), BuiltinTool::GetCurrentTime);
    }

    #[test]
    fn test_definitions_match_names() {
        for (tool, definition) in BuiltinTool::iter().zip(registry().definitions()) {
            assert_eq!(tool.as_ref(), definition.name);
            assert_eq!(definition.parameters["type"], "object");
        }
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let result = registry().execute("launch_rocket", &Map::new()).await;
        assert_eq!(result, "Error: Unknown tool 'launch_rocket'");
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let result = registry()
            .execute("read_file", &args(json!({"path": "a.txt"})))
            .await;
        assert!(result.starts_with("Error: Invalid arguments for read_file:"));

        let result = registry()
            .execute("list_directory", &args(json!({"recursive": "sometimes"})))
            .await;
        assert!(result.starts_with("Error: Invalid arguments for list_directory:"));
    }

    #[test]
    fn test_confirmation_switch() {
        let (confirmation, actions) = confirmation(true, false);
        assert!(!confirmation.check("!", "Command execution: rm x", &[]));
        confirmation.set_required(false);
        assert!(confirmation.check("!", "Command execution: rm x", &[]));
        assert_eq!(actions.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_registry_toggles_shared_confirmation() {
        let (confirmation, _) = confirmation(true, true);
        let registry = ToolRegistry::new(confirmation.clone());
        registry.set_require_confirmation(false);
        assert!(!confirmation.is_required());
        assert!(!registry.require_confirmation());
    }
}
