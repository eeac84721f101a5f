use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised inside a tool. They never cross the registry boundary: the
/// registry renders them into the tool-result string the model reads next.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Unknown tool '{0}'")]
    ToolNotFound(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidParameters { tool: String, reason: String },

    #[error("{0}")]
    ExecutionError(String),

    #[error("{0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

impl AgentError {
    pub fn invalid<T: Into<String>, R: Into<String>>(tool: T, reason: R) -> Self {
        AgentError::InvalidParameters {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Render as the plain string that is fed back to the model.
    ///
    /// Cancellations are reported verbatim, everything else is prefixed so the
    /// model can tell a failure from regular output.
    pub fn to_tool_result(&self) -> String {
        match self {
            AgentError::Cancelled(message) => message.clone(),
            other => format!("Error: {}", other),
        }
    }
}

/// Failures talking to the chat backend. These end the current turn and are
/// propagated to the caller untouched.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Model '{0}' not found")]
    ModelNotFound(String),

    #[error("Could not reach the backend at {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("Server error: {0}")]
    Server(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Could not decode backend response: {0}")]
    Decode(String),
}
