use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

use super::{parse_arguments, ToolHandler};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

pub const NAME: &str = "list_directory";
const RULE_WIDTH: usize = 80;

fn default_path() -> String {
    ".".to_string()
}

fn default_max_depth() -> usize {
    3
}

/// Models often send booleans and numbers as strings
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected a boolean, got {}",
            other
        ))),
    }
}

fn lenient_usize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| serde::de::Error::custom(format!("expected an integer, got {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got \"{}\"", s))),
        other => Err(serde::de::Error::custom(format!(
            "expected an integer, got {}",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    #[serde(default = "default_path")]
    path: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    show_hidden: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    recursive: bool,
    #[serde(default = "default_max_depth", deserialize_with = "lenient_usize")]
    max_depth: usize,
}

struct Entry {
    name: String,
    path: PathBuf,
    is_dir: bool,
    size: Option<u64>,
}

pub struct ListDirectory;

pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.1}{}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1}PB", size)
}

/// Directories first, then files, each case-insensitively by name
fn read_entries(dir: &Path, show_hidden: bool) -> std::io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !show_hidden && name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let is_dir = path.is_dir();
        let size = if is_dir {
            None
        } else {
            entry.metadata().ok().map(|m| m.len())
        };
        entries.push(Entry {
            name,
            path,
            is_dir,
            size,
        });
    }
    entries.sort_by_key(|e| (!e.is_dir, e.name.to_lowercase()));
    Ok(entries)
}

fn plural(count: usize, one: &str, many: &str) -> String {
    format!("{} {}", count, if count == 1 { one } else { many })
}

fn list_flat(target: &Path, show_hidden: bool) -> AgentResult<String> {
    let entries = read_entries(target, show_hidden).map_err(|e| {
        AgentError::ExecutionError(format!(
            "Permission denied to access directory: {} ({})",
            target.display(),
            e
        ))
    })?;

    let mut lines = vec![
        format!("Directory: {}", target.display()),
        "=".repeat(RULE_WIDTH),
    ];
    if entries.is_empty() {
        lines.push("(empty directory)".to_string());
        return Ok(lines.join("\n"));
    }

    lines.push(format!("{:<53} {:>10}", "Name", "Size"));
    lines.push("-".repeat(RULE_WIDTH));
    for entry in &entries {
        let (icon, size) = match (entry.is_dir, entry.size) {
            (true, _) => ("📁", "<DIR>".to_string()),
            (false, Some(size)) => ("📄", format_size(size)),
            (false, None) => ("📄", "<N/A>".to_string()),
        };
        lines.push(format!("{} {:<50} {:>10}", icon, entry.name, size));
    }

    let dirs = entries.iter().filter(|e| e.is_dir).count();
    let files = entries.len() - dirs;
    lines.push("-".repeat(RULE_WIDTH));
    lines.push(format!(
        "Total: {}, {}",
        plural(dirs, "directory", "directories"),
        plural(files, "file", "files")
    ));
    Ok(lines.join("\n"))
}

fn list_tree(
    dir: &Path,
    show_hidden: bool,
    max_depth: usize,
    depth: usize,
    prefix: &str,
    lines: &mut Vec<String>,
) {
    if depth >= max_depth {
        return;
    }
    let entries = match read_entries(dir, show_hidden) {
        Ok(entries) => entries,
        Err(_) => {
            lines.push(format!("{}[Permission Denied]", prefix));
            return;
        }
    };

    let count = entries.len();
    for (index, entry) in entries.iter().enumerate() {
        let is_last = index + 1 == count;
        let connector = if is_last { "└── " } else { "├── " };
        if entry.is_dir {
            lines.push(format!("{}{}📁 {}", prefix, connector, entry.name));
            let extension = if is_last { "    " } else { "│   " };
            list_tree(
                &entry.path,
                show_hidden,
                max_depth,
                depth + 1,
                &format!("{}{}", prefix, extension),
                lines,
            );
        } else {
            let size = entry
                .size
                .map_or_else(|| " (N/A)".to_string(), |s| format!(" ({})", format_size(s)));
            lines.push(format!("{}{}📄 {}{}", prefix, connector, entry.name, size));
        }
    }
}

#[async_trait]
impl ToolHandler for ListDirectory {
    fn definition(&self) -> Tool {
        Tool::new(
            NAME,
            "List contents of a directory with detailed information about files and subdirectories",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path to the directory to list (absolute or relative). Defaults to current working directory if not specified."
                    },
                    "show_hidden": {
                        "type": "boolean",
                        "description": "Whether to show hidden files (files starting with .). Default: false",
                        "default": false
                    },
                    "recursive": {
                        "type": "boolean",
                        "description": "Whether to list subdirectories recursively. Default: false",
                        "default": false
                    },
                    "max_depth": {
                        "type": "integer",
                        "description": "Maximum depth for recursive listing. Default: 3",
                        "default": 3
                    }
                },
                "required": []
            }),
        )
    }

    async fn execute(&self, arguments: Map<String, Value>) -> AgentResult<String> {
        let params: Params = parse_arguments(NAME, arguments)?;

        let expanded = shellexpand::tilde(&params.path).into_owned();
        let target = std::fs::canonicalize(&expanded).map_err(|_| {
            AgentError::ExecutionError(format!("Path does not exist: {}", params.path))
        })?;
        if !target.is_dir() {
            return Err(AgentError::ExecutionError(format!(
                "Path is not a directory: {}",
                params.path
            )));
        }

        if !params.recursive {
            return list_flat(&target, params.show_hidden);
        }

        let root_name = target
            .file_name()
            .map_or_else(|| target.display().to_string(), |n| n.to_string_lossy().into_owned());
        let mut lines = vec![
            format!("Directory Tree: {}", target.display()),
            "=".repeat(RULE_WIDTH),
            format!("📁 {}", root_name),
        ];
        list_tree(&target, params.show_hidden, params.max_depth, 0, "", &mut lines);
        lines.push("=".repeat(RULE_WIDTH));
        lines.push(format!("Max depth: {} levels", params.max_depth));
        Ok(lines.join("\n"))
    }
}
