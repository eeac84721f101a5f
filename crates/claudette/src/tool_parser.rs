//! Recovers tool calls that a model wrote into its answer text instead of
//! using the native function-calling field.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use strum_macros::Display;

use crate::models::tool::ToolCall;

lazy_static! {
    static ref XML_WRAPPER: Regex = Regex::new(
        r"(?s)<function=([A-Za-z_][A-Za-z0-9_-]*)>\s*(\{.*?\})\s*</(?:tool_call|function)>"
    )
    .unwrap();
    static ref CODE_FENCE: Regex =
        Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```$").unwrap();
    static ref EMPTY_FENCE: Regex = Regex::new(r"```[A-Za-z0-9_-]*\s*```").unwrap();
    static ref TEXT_CALL: Regex = Regex::new(
        r#"\b([A-Za-z_][A-Za-z0-9_]*)\(\s*(?:'([^']*)'|"([^"]*)")\s*\)"#
    )
    .unwrap();
}

/// Tools that may be invoked as `name('argument')`, with the parameter the
/// single positional argument binds to.
const TEXT_CALL_TOOLS: [(&str, &str); 5] = [
    ("read_file", "file_path"),
    ("list_directory", "path"),
    ("web_search", "query"),
    ("execute_command", "command"),
    ("ask_user", "question"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ParseStrategy {
    XmlWrapper,
    EmbeddedJson,
    WholeText,
    TextCall,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub call: ToolCall,
    /// The text with the call syntax removed, trimmed
    pub remaining_text: String,
    pub strategy: ParseStrategy,
}

/// Look for a single tool call written as text.
///
/// Only names in `known_tools` are accepted. Strategies are tried in a fixed
/// order and the first that yields a call wins.
pub fn parse_tool_call<S: AsRef<str>>(text: &str, known_tools: &[S]) -> Option<ParsedToolCall> {
    if text.trim().is_empty() || known_tools.is_empty() {
        return None;
    }
    let is_known = |name: &str| known_tools.iter().any(|t| t.as_ref() == name);

    let parsed = parse_xml_wrapper(text, &is_known)
        .or_else(|| parse_embedded_json(text, &is_known))
        .or_else(|| parse_whole_text(text, &is_known))
        .or_else(|| parse_text_call(text, &is_known))?;

    tracing::debug!(
        tool = parsed.call.name(),
        strategy = %parsed.strategy,
        "recovered tool call from text"
    );
    Some(parsed)
}

fn parse_xml_wrapper(text: &str, is_known: &dyn Fn(&str) -> bool) -> Option<ParsedToolCall> {
    for captures in XML_WRAPPER.captures_iter(text) {
        let name = &captures[1];
        if !is_known(name) {
            continue;
        }
        let Ok(Value::Object(arguments)) = serde_json::from_str::<Value>(&captures[2]) else {
            continue;
        };
        let span = captures.get(0)?.range();
        return Some(ParsedToolCall {
            call: ToolCall::new(name, arguments),
            remaining_text: remove_span(text, span.start, span.end),
            strategy: ParseStrategy::XmlWrapper,
        });
    }
    None
}

fn parse_embedded_json(text: &str, is_known: &dyn Fn(&str) -> bool) -> Option<ParsedToolCall> {
    let candidates: Vec<(usize, usize, ToolCall)> = json_object_spans(text)
        .into_iter()
        .filter_map(|(start, end)| {
            let value = serde_json::from_str::<Value>(&text[start..end]).ok()?;
            let call = call_from_value(&value)?;
            is_known(call.name()).then_some((start, end, call))
        })
        .collect();

    if candidates.len() > 1 {
        tracing::warn!(
            candidates = candidates.len(),
            tool = candidates[0].2.name(),
            "several tool calls found in text, only the first is used"
        );
    }

    let (start, end, call) = candidates.into_iter().next()?;
    Some(ParsedToolCall {
        call,
        remaining_text: remove_span(text, start, end),
        strategy: ParseStrategy::EmbeddedJson,
    })
}

fn parse_whole_text(text: &str, is_known: &dyn Fn(&str) -> bool) -> Option<ParsedToolCall> {
    let trimmed = text.trim();
    let body = CODE_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str().trim());

    let value = serde_json::from_str::<Value>(body).ok()?;
    let call = call_from_value(&value)?;
    if !is_known(call.name()) {
        return None;
    }
    Some(ParsedToolCall {
        call,
        remaining_text: String::new(),
        strategy: ParseStrategy::WholeText,
    })
}

fn parse_text_call(text: &str, is_known: &dyn Fn(&str) -> bool) -> Option<ParsedToolCall> {
    for captures in TEXT_CALL.captures_iter(text) {
        let name = &captures[1];
        let Some((_, parameter)) = TEXT_CALL_TOOLS.iter().find(|(tool, _)| *tool == name) else {
            continue;
        };
        if !is_known(name) {
            continue;
        }
        let argument = captures
            .get(2)
            .or_else(|| captures.get(3))
            .map_or("", |m| m.as_str());

        let mut arguments = Map::new();
        arguments.insert(parameter.to_string(), Value::String(argument.to_string()));
        let span = captures.get(0)?.range();
        return Some(ParsedToolCall {
            call: ToolCall::new(name, arguments),
            remaining_text: remove_span(text, span.start, span.end),
            strategy: ParseStrategy::TextCall,
        });
    }
    None
}

/// Accept `{"name": ..., "arguments": {...}}`, with arguments possibly JSON-encoded
fn call_from_value(value: &Value) -> Option<ToolCall> {
    let object = value.as_object()?;
    let name = object.get("name")?.as_str()?;
    let arguments = match object.get("arguments")? {
        Value::Object(map) => map.clone(),
        Value::String(raw) => match serde_json::from_str::<Value>(raw).ok()? {
            Value::Object(map) => map,
            _ => return None,
        },
        Value::Null => Map::new(),
        _ => return None,
    };
    Some(ToolCall::new(name, arguments))
}

/// Byte ranges of the top-level `{...}` spans in `text`.
///
/// Braces inside JSON strings are ignored, so argument values may contain them.
/// A `{` that never closes is skipped and the scan resumes at the next one.
fn json_object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut from = 0usize;

    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        match balanced_end(text, start) {
            Some(end) => {
                spans.push((start, end));
                from = end;
            }
            None => from = start + 1,
        }
    }
    spans
}

/// End of the balanced span opening at `start`, if it closes
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn remove_span(text: &str, start: usize, end: usize) -> String {
    let joined = format!("{}{}", &text[..start], &text[end..]);
    EMPTY_FENCE.replace_all(&joined, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOOLS: [&str; 8] = [
        "ask_user",
        "web_search",
        "read_file",
        "write_file",
        "edit_file",
        "execute_command",
        "get_current_time",
        "list_directory",
    ];

    #[test]
    fn test_xml_wrapper() {
        let parsed =
            parse_tool_call(r#"<function=read_file>{"file_path": "a.txt"}</tool_call>"#, &TOOLS)
                .unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::XmlWrapper);
        assert_eq!(parsed.call.name(), "read_file");
        assert_eq!(
            Value::Object(parsed.call.arguments().clone()),
            json!({"file_path": "a.txt"})
        );
        assert!(parsed.remaining_text.trim().is_empty());
    }

    #[test]
    fn test_xml_wrapper_with_nested_braces_and_prose() {
        let text = "Let me write it.\n<function=write_file>{\"file_path\": \"x.json\", \"content\": \"{\\\"a\\\": {}}\"}</tool_call>";
        let parsed = parse_tool_call(text, &TOOLS).unwrap();
        assert_eq!(parsed.call.name(), "write_file");
        assert_eq!(parsed.call.arguments()["content"], "{\"a\": {}}");
        assert_eq!(parsed.remaining_text, "Let me write it.");
    }

    #[test]
    fn test_embedded_json() {
        let text = "I'll check the directory first.\n```json\n{\"name\": \"list_directory\", \"arguments\": {\"path\": \"src\"}}\n```";
        let parsed = parse_tool_call(text, &TOOLS).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::EmbeddedJson);
        assert_eq!(parsed.call.name(), "list_directory");
        assert_eq!(parsed.call.arguments()["path"], "src");
        assert_eq!(parsed.remaining_text, "I'll check the directory first.");
    }

    #[test]
    fn test_embedded_json_braces_inside_strings() {
        let text = r#"Running: {"name": "execute_command", "arguments": {"command": "echo '}{'"}} now"#;
        let parsed = parse_tool_call(text, &TOOLS).unwrap();
        assert_eq!(parsed.call.arguments()["command"], "echo '}{'");
        assert_eq!(parsed.remaining_text, "Running:  now");
    }

    #[test]
    fn test_embedded_json_string_arguments() {
        let text = r#"{"name": "web_search", "arguments": "{\"query\": \"rust async\"}"}"#;
        let parsed = parse_tool_call(text, &TOOLS).unwrap();
        assert_eq!(parsed.call.arguments()["query"], "rust async");
    }

    #[test]
    fn test_first_of_several_candidates() {
        let text = r#"{"name": "read_file", "arguments": {"file_path": "a"}} {"name": "read_file", "arguments": {"file_path": "b"}}"#;
        let parsed = parse_tool_call(text, &TOOLS).unwrap();
        assert_eq!(parsed.call.arguments()["file_path"], "a");
    }

    #[test]
    fn test_whole_text_fenced() {
        let parsed = parse_whole_text(
            "```json\n{\"name\": \"get_current_time\", \"arguments\": {}}\n```",
            &|name: &str| TOOLS.contains(&name),
        )
        .unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::WholeText);
        assert_eq!(parsed.call.name(), "get_current_time");
        assert!(parsed.remaining_text.is_empty());
    }

    #[test]
    fn test_text_call() {
        let parsed = parse_tool_call("Sure: read_file('notes/todo.md')", &TOOLS).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::TextCall);
        assert_eq!(parsed.call.name(), "read_file");
        assert_eq!(parsed.call.arguments()["file_path"], "notes/todo.md");
        assert_eq!(parsed.remaining_text, "Sure:");

        let parsed = parse_tool_call(r#"execute_command("ls -la")"#, &TOOLS).unwrap();
        assert_eq!(parsed.call.arguments()["command"], "ls -la");
    }

    #[test]
    fn test_text_call_outside_allow_list() {
        assert!(parse_tool_call("write_file('a.txt')", &TOOLS).is_none());
        assert!(parse_tool_call("print('hello')", &TOOLS).is_none());
    }

    #[test]
    fn test_plain_prose_is_not_a_call() {
        assert!(parse_tool_call("The capital of France is Paris.", &TOOLS).is_none());
    }

    #[test]
    fn test_unrelated_json_is_not_a_call() {
        let text = "Here is a package manifest:\n```json\n{\"name\": \"my-app\", \"version\": \"1.0.0\", \"scripts\": {\"build\": \"tsc\"}}\n```";
        assert!(parse_tool_call(text, &TOOLS).is_none());
    }

    #[test]
    fn test_unknown_tool_name_is_rejected() {
        let text = r#"{"name": "delete_everything", "arguments": {}}"#;
        assert!(parse_tool_call(text, &TOOLS).is_none());
        let text = r#"<function=launch>{"target": "moon"}</tool_call>"#;
        assert!(parse_tool_call(text, &TOOLS).is_none());
    }

    #[test]
    fn test_no_registry_means_no_parsing() {
        let empty: [&str; 0] = [];
        assert!(parse_tool_call(r#"read_file('a.txt')"#, &empty).is_none());
    }

    #[test]
    fn test_json_object_spans() {
        let text = r#"a {"x": "}"} b {"y": {"z": 1}} {unclosed"#;
        let spans = json_object_spans(text);
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].0..spans[0].1], r#"{"x": "}"}"#);
        assert_eq!(&text[spans[1].0..spans[1].1], r#"{"y": {"z": 1}}"#);
    }

    #[test]
    fn test_embedded_json_after_unclosed_brace() {
        let text = r#"In Rust a block opens with { and then I call {"name": "read_file", "arguments": {"file_path": "a.txt"}}"#;
        let parsed = parse_tool_call(text, &TOOLS).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::EmbeddedJson);
        assert_eq!(parsed.call.name(), "read_file");
        assert_eq!(parsed.call.arguments()["file_path"], "a.txt");
        assert_eq!(
            parsed.remaining_text,
            "In Rust a block opens with { and then I call"
        );
    }

    #[test]
    fn test_json_object_spans_skip_unclosed_opener() {
        let text = r#"{ open {"a": 1} and {"b": "{"}"#;
        let spans = json_object_spans(text);
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].0..spans[0].1], r#"{"a": 1}"#);
        assert_eq!(&text[spans[1].0..spans[1].1], r#"{"b": "{"}"#);
    }
}
