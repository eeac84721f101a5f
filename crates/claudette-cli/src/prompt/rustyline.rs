use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::Result;
use bat::WrappingMode;
use cliclack::spinner;
use console::style;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;

use claudette::agent::ReplyObserver;
use claudette::models::tool::ToolCall;

use super::{thinking::get_random_thinking_message, Input, InputType, Prompt, Theme};

const PROMPT: &str = "\x1b[1m\x1b[38;5;30m>>> \x1b[0m";
const MAX_STRING_LENGTH: usize = 40;
const MAX_RESULT_LINES: usize = 10;
const INDENT: &str = "    ";

pub struct RustylinePrompt {
    editor: DefaultEditor,
    history_file: Option<PathBuf>,
    theme: Theme,
    observer: Arc<TerminalObserver>,
}

impl RustylinePrompt {
    pub fn new(history_file: Option<PathBuf>) -> Result<Self> {
        let mut editor = DefaultEditor::new()?;
        if let Some(path) = &history_file {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if let Err(error) = editor.load_history(path) {
                tracing::debug!(path = %path.display(), %error, "no input history loaded");
            }
        }

        Ok(RustylinePrompt {
            editor,
            history_file,
            theme: Theme::Dark,
            observer: Arc::new(TerminalObserver::default()),
        })
    }

    /// Display hooks for the agent, sharing this prompt's spinner
    pub fn observer(&self) -> Arc<TerminalObserver> {
        self.observer.clone()
    }

    fn remember(&mut self, line: &str) {
        if let Err(error) = self.editor.add_history_entry(line) {
            tracing::debug!(%error, "could not add history entry");
        }
        if let Some(path) = &self.history_file {
            if let Err(error) = self.editor.save_history(path) {
                tracing::warn!(path = %path.display(), %error, "could not save input history");
            }
        }
    }
}

/// Spinner and tool rendering while a turn is running
#[derive(Default)]
pub struct TerminalObserver {
    state: Mutex<ObserverState>,
}

#[derive(Default)]
struct ObserverState {
    spinner: Option<cliclack::ProgressBar>,
    label: &'static str,
    started: Option<Instant>,
    thinking_tokens: u32,
    response_tokens: u32,
}

impl ObserverState {
    fn status(&self) -> String {
        let elapsed = self.started.map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0);
        let mut status = format!("{}... {:.1}s", self.label, elapsed);
        if self.thinking_tokens > 0 {
            status.push_str(&format!(" | {} thinking tokens", self.thinking_tokens));
        }
        if self.response_tokens > 0 {
            status.push_str(&format!(" | {} tokens", self.response_tokens));
        }
        status
    }
}

impl TerminalObserver {
    fn state(&self) -> MutexGuard<'_, ObserverState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(&self) {
        let mut state = self.state();
        state.label = get_random_thinking_message();
        state.started = Some(Instant::now());
        state.thinking_tokens = 0;
        state.response_tokens = 0;
        Self::start_spinner(&mut state);
    }

    pub fn stop(&self) {
        let mut state = self.state();
        if let Some(spinner) = state.spinner.take() {
            spinner.stop("");
        }
    }

    fn start_spinner(state: &mut ObserverState) {
        if state.spinner.is_none() {
            let spinner = spinner();
            spinner.start(state.status());
            state.spinner = Some(spinner);
        }
    }

    /// Show `status` instead of the token counters
    pub fn set_status(&self, status: &str) {
        let state = self.state();
        if let Some(spinner) = &state.spinner {
            spinner.set_message(status);
        }
    }

    fn refresh(state: &ObserverState) {
        if let Some(spinner) = &state.spinner {
            spinner.set_message(state.status());
        }
    }
}

impl ReplyObserver for TerminalObserver {
    fn on_pass_start(&self) {
        let mut state = self.state();
        if state.started.is_none() {
            state.started = Some(Instant::now());
            state.label = get_random_thinking_message();
        }
        Self::start_spinner(&mut state);
    }

    fn on_content(&self, _delta: &str) {
        let mut state = self.state();
        state.response_tokens += 1;
        Self::refresh(&state);
    }

    fn on_thinking(&self, _delta: &str) {
        let mut state = self.state();
        state.thinking_tokens += 1;
        Self::refresh(&state);
    }

    fn on_tool_call(&self, call: &ToolCall) {
        self.stop();
        print_tool_call(call);
    }

    fn on_tool_result(&self, _call: &ToolCall, result: &str) {
        print_tool_result(result);
    }

    fn on_guard_retry(&self, thinking_tokens: u32) {
        self.stop();
        println!(
            "{}",
            style(format!(
                "⚠ The model thought for {} tokens without answering, asking it to answer directly.",
                thinking_tokens
            ))
            .yellow()
        );
    }
}

fn print_tool_call(call: &ToolCall) {
    let tool_header = format!(
        "─── {} ──────────────────────────",
        style(call.name()).magenta().bold(),
    );
    print_newline();
    println!("{}", tool_header);

    // Commands are short and worth seeing in full
    match call.arguments().get("command") {
        Some(Value::String(command)) if call.name() == "execute_command" => {
            println!("{}: {}", style("command").dim(), style(command).green());
        }
        _ => print_params(&Value::Object(call.arguments().clone()), 0),
    }
}

fn print_tool_result(result: &str) {
    let lines: Vec<&str> = result.lines().collect();
    for line in lines.iter().take(MAX_RESULT_LINES) {
        println!("{}{}", INDENT, style(line).dim());
    }
    if lines.len() > MAX_RESULT_LINES {
        println!(
            "{}{}",
            INDENT,
            style(format!("... {} more lines", lines.len() - MAX_RESULT_LINES)).dim()
        );
    }
    print_newline();
}

fn print_markdown(content: &str, theme: &str) {
    let printed = bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()))
        .theme(theme)
        .language("Markdown")
        .wrapping_mode(WrappingMode::Character)
        .print();
    if let Err(error) = printed {
        tracing::debug!(%error, "markdown rendering failed, printing plain text");
        println!("{}", content);
    }
}

/// Format and print parameters recursively with proper indentation and colors
fn print_params(value: &Value, depth: usize) {
    let indent = INDENT.repeat(depth);

    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) => {
                        println!("{}{}:", indent, style(key).dim());
                        print_params(val, depth + 1);
                    }
                    Value::Array(arr) => {
                        println!("{}{}:", indent, style(key).dim());
                        for item in arr.iter() {
                            println!("{}{}- ", indent, INDENT);
                            print_params(item, depth + 2);
                        }
                    }
                    Value::String(s) => {
                        println!("{}{}: {}", indent, style(key).dim(), shorten(s));
                    }
                    Value::Number(n) => {
                        println!("{}{}: {}", indent, style(key).dim(), style(n).blue());
                    }
                    Value::Bool(b) => {
                        println!("{}{}: {}", indent, style(key).dim(), style(b).blue());
                    }
                    Value::Null => {
                        println!("{}{}: {}", indent, style(key).dim(), style("null").dim());
                    }
                }
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                println!("{}{}.", indent, i + 1);
                print_params(item, depth + 1);
            }
        }
        Value::String(s) => println!("{}{}", indent, shorten(s)),
        Value::Number(n) => println!("{}{}", indent, style(n).yellow()),
        Value::Bool(b) => println!("{}{}", indent, style(b).yellow()),
        Value::Null => println!("{}{}", indent, style("null").dim()),
    }
}

/// Long strings (file contents mostly) are summarized by their size
fn shorten(s: &str) -> String {
    if s.chars().count() > MAX_STRING_LENGTH || s.contains('\n') {
        style(format!("[{} chars]", s.chars().count()))
            .yellow()
            .to_string()
    } else {
        style(s).green().to_string()
    }
}

fn print_newline() {
    println!();
}

impl Prompt for RustylinePrompt {
    fn render(&mut self, text: &str) {
        print_markdown(text, self.theme.bat_theme());
        print_newline();
        if let Err(error) = io::stdout().flush() {
            tracing::debug!(%error, "could not flush stdout");
        }
    }

    fn render_thinking(&self, thinking: &str) {
        println!("{}", style("Thinking:").dim().bold());
        for line in thinking.trim().lines() {
            println!("{}", style(line).dim().italic());
        }
        print_newline();
    }

    fn render_info(&self, text: &str) {
        println!("{}", style(text).cyan());
    }

    fn render_error(&self, text: &str) {
        eprintln!("{} {}", style("✗").red().bold(), style(text).red());
    }

    fn show_busy(&mut self) {
        self.observer.start();
    }

    fn update_busy(&self, status: &str) {
        self.observer.set_status(status);
    }

    fn hide_busy(&self) {
        self.observer.stop();
        let mut state = self.observer.state();
        state.started = None;
    }

    fn get_input(&mut self) -> Result<Input> {
        let input = self.editor.readline(PROMPT);
        let message_text = match input {
            Ok(text) => text,
            Err(e) => {
                match e {
                    ReadlineError::Interrupted | ReadlineError::Eof => (),
                    _ => eprintln!("Input error: {}", e),
                }
                return Ok(Input {
                    input_type: InputType::Exit,
                    content: None,
                });
            }
        };
        let message_text = message_text.trim().to_string();
        if message_text.is_empty() {
            return Ok(Input {
                input_type: InputType::AskAgain,
                content: None,
            });
        }
        self.remember(&message_text);

        if message_text.eq_ignore_ascii_case("/t") {
            self.theme = match self.theme {
                Theme::Light => {
                    println!("Switching to Dark theme");
                    Theme::Dark
                }
                Theme::Dark => {
                    println!("Switching to Light theme");
                    Theme::Light
                }
            };
            return Ok(Input {
                input_type: InputType::AskAgain,
                content: None,
            });
        }

        Ok(Input {
            input_type: InputType::Message,
            content: Some(message_text),
        })
    }

    fn close(&self) {
        self.observer.stop();
    }
}
