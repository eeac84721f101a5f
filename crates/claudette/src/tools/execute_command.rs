use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use super::{parse_arguments, Confirmation, ToolHandler};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

pub const NAME: &str = "execute_command";

/// Read-only commands that run without confirmation. A command qualifies when it
/// equals an entry or continues it with whitespace.
const SAFE_COMMANDS: &[&str] = &[
    "ls", "tree", "pwd", "cd", "find", "locate",
    "cat", "head", "tail", "less", "more", "grep", "wc", "file",
    "whoami", "hostname", "uname", "date", "uptime", "df", "du", "free", "ps",
    "ifconfig", "ip", "netstat", "nslookup", "dig", "host",
    "diff", "cmp",
    "tar -t", "tar -tf", "tar -tvf", "unzip -l", "unzip -lv", "zip -sf",
    "git status", "git log", "git diff", "git branch", "git show", "git ls-files",
    "git ls-tree", "git reflog", "git remote", "git tag",
    "which", "whereis", "type", "echo", "printenv",
];

/// Safe only without arguments; `env CMD` runs CMD
const SAFE_BARE_COMMANDS: &[&str] = &["env"];

const SHELL_OPERATORS: &[&str] = &[";", "&", "|", "`", "$(", ">", "<", "\n"];
const FIND_ACTIONS: &[&str] = &["-exec", "-execdir", "-ok", "-okdir", "-delete", "-fprint", "-fls"];

/// Whether `command` may skip the confirmation gate
pub fn is_safe_command(command: &str) -> bool {
    let command = command.trim();
    if command.is_empty() || SHELL_OPERATORS.iter().any(|op| command.contains(op)) {
        return false;
    }
    if SAFE_BARE_COMMANDS.contains(&command) || is_bounded_ping(command) {
        return true;
    }
    let matches_prefix = SAFE_COMMANDS.iter().any(|prefix| {
        command == *prefix
            || command
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with(char::is_whitespace))
    });
    if !matches_prefix {
        return false;
    }
    let is_find = command.split_whitespace().next() == Some("find");
    !(is_find
        && command
            .split_whitespace()
            .any(|word| FIND_ACTIONS.contains(&word)))
}

/// `ping` never stops on its own, so it is only safe with a packet count
fn is_bounded_ping(command: &str) -> bool {
    let mut words = command.split_whitespace();
    if words.next() != Some("ping") {
        return false;
    }
    let words: Vec<&str> = words.collect();
    words.iter().enumerate().any(|(i, word)| match word.strip_prefix("-c") {
        Some("") => words.get(i + 1).is_some_and(|n| n.parse::<u32>().is_ok()),
        Some(count) => count.parse::<u32>().is_ok(),
        None => false,
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    command: String,
    #[serde(default)]
    working_dir: Option<String>,
}

pub struct ExecuteCommand {
    confirmation: Arc<Confirmation>,
    timeout: Duration,
}

impl ExecuteCommand {
    pub fn new(confirmation: Arc<Confirmation>, timeout: Duration) -> Self {
        Self {
            confirmation,
            timeout,
        }
    }
}

#[async_trait]
impl ToolHandler for ExecuteCommand {
    fn definition(&self) -> Tool {
        Tool::new(
            NAME,
            "Execute a shell command and return the output",
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    },
                    "working_dir": {
                        "type": "string",
                        "description": "Working directory for the command (optional)"
                    }
                },
                "required": ["command"]
            }),
        )
    }

    async fn execute(&self, arguments: Map<String, Value>) -> AgentResult<String> {
        let params: Params = parse_arguments(NAME, arguments)?;

        if !is_safe_command(&params.command) {
            let action = format!("Command execution: {}", params.command);
            if !self.confirmation.check("⚠", &action, &[]) {
                return Err(AgentError::Cancelled(
                    "Command execution cancelled by user.".into(),
                ));
            }
        }

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&params.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = params.working_dir.as_deref().filter(|d| !d.is_empty()) {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| AgentError::ExecutionError(format!("Failed to execute command: {}", e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output
                .map_err(|e| AgentError::ExecutionError(format!("Failed to execute command: {}", e)))?,
            Err(_) => {
                return Err(AgentError::ExecutionError(format!(
                    "Command execution timed out ({}s limit).",
                    self.timeout.as_secs()
                )))
            }
        };

        let mut sections = Vec::new();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.is_empty() {
            sections.push(format!("STDOUT:\n{}", stdout));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            sections.push(format!("STDERR:\n{}", stderr));
        }
        let code = output
            .status
            .code()
            .map_or_else(|| "terminated by signal".to_string(), |c| c.to_string());
        sections.push(format!("Return code: {}", code));

        Ok(sections.join("\n"))
    }
}
