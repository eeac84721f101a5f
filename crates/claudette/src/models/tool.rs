use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema of the parameters that the tool accepts
    pub parameters: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// The function-calling declaration handed to the backend
    pub fn to_spec(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "RawFunctionCall")]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Map<String, Value>,
    /// Set when the model sent arguments that are not a JSON object. The call
    /// is still kept so the model can be told what was wrong with it.
    #[serde(skip_serializing)]
    pub invalid_arguments: Option<String>,
}

/// Wire form of a function call; backends disagree on whether arguments are
/// an object or a JSON-encoded string.
#[derive(Deserialize)]
struct RawFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl From<RawFunctionCall> for FunctionCall {
    fn from(raw: RawFunctionCall) -> Self {
        let (arguments, invalid_arguments) = match decode_arguments(raw.arguments) {
            Ok(arguments) => (arguments, None),
            Err(reason) => (Map::new(), Some(reason)),
        };
        FunctionCall {
            name: raw.name,
            arguments,
            invalid_arguments,
        }
    }
}

/// A tool invocation requested by the model, either natively or recovered from text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new<S: Into<String>>(name: S, arguments: Map<String, Value>) -> Self {
        Self {
            function: FunctionCall {
                name: name.into(),
                arguments,
                invalid_arguments: None,
            },
        }
    }

    /// Build a call from any JSON value, keeping only object arguments
    pub fn from_value<S: Into<String>>(name: S, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(name, arguments)
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.function.arguments
    }

    /// Why the arguments the model sent could not be decoded, if they could not
    pub fn invalid_arguments(&self) -> Option<&str> {
        self.function.invalid_arguments.as_deref()
    }
}

fn decode_arguments(arguments: Value) -> Result<Map<String, Value>, String> {
    match arguments {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        Value::String(raw) if raw.trim().is_empty() => Ok(Map::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!("arguments must be a JSON object, got {}", other)),
            Err(e) => Err(format!("arguments are not valid JSON ({}): {}", e, raw)),
        },
        other => Err(format!("arguments must be a JSON object, got {}", other)),
    }
}
