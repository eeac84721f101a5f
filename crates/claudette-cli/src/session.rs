use anyhow::Result;
use futures::StreamExt;
use std::path::{Path, PathBuf};

use claudette::agent::{Agent, TurnOutcome};
use claudette::conversation::Conversation;
use claudette::errors::ProviderError;
use claudette::models::message::Message;
use claudette::models::role::Role;
use claudette::prompt_template::init_instructions;
use claudette::providers::base::{ModelInfo, PullProgress};
use claudette::stats::ModelStats;

use crate::commands::{help_text, parse_command, parse_temperature, Command, CommandName};
use crate::prompt::{InputType, Prompt};

pub mod session_file;

const HISTORY_PREVIEW_CHARS: usize = 200;
const PROJECT_NOTES_FILE: &str = "AGENTS.md";
const INIT_TEMPERATURE: f32 = 0.1;

/// Settings the user can change from inside a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub temperature: f32,
    pub enable_thinking: bool,
    pub reprompting: bool,
    pub host: String,
}

enum Flow {
    Continue,
    Exit,
}

pub struct Session<'a> {
    agent: Agent,
    prompt: Box<dyn Prompt + 'a>,
    conversation: Conversation,
    options: SessionOptions,
    conversations_dir: PathBuf,
}

impl<'a> Session<'a> {
    pub fn new(agent: Agent, prompt: Box<dyn Prompt + 'a>, options: SessionOptions) -> Self {
        let mut conversation = Conversation::new();
        conversation.push(agent.system_message());
        Session {
            agent,
            prompt,
            conversation,
            options,
            conversations_dir: session_file::conversations_dir(),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        self.prompt.claudette_ready(&self.agent.profile().name);

        loop {
            let input = self.prompt.get_input()?;
            match input.input_type {
                InputType::Message => {
                    let Some(content) = input.content else {
                        continue;
                    };
                    if let Some(command) = parse_command(&content) {
                        if let Flow::Exit = self.run_command(command).await {
                            break;
                        }
                        continue;
                    }
                    self.process_message(&content).await;
                }
                InputType::Exit => break,
                InputType::AskAgain => continue,
            }
        }
        self.prompt.render_info("Goodbye!");
        self.prompt.close();
        Ok(())
    }

    /// Answer a single message and return, for `claudette run`
    pub async fn headless_start(&mut self, message: &str) -> Result<()> {
        let answered = self.process_message(message).await;
        self.prompt.close();
        if !answered {
            anyhow::bail!("The message could not be answered");
        }
        Ok(())
    }

    /// Run one turn. Returns false when the turn failed or was interrupted,
    /// in which case the conversation is reset to how it was before the message.
    async fn process_message(&mut self, text: &str) -> bool {
        let checkpoint = self.conversation.len();

        let text = if self.options.reprompting {
            self.prompt.show_busy();
            let rewritten = self.agent.reprompt(text).await;
            self.prompt.hide_busy();
            match rewritten {
                Ok(rewritten) => {
                    if rewritten != text {
                        self.prompt.render_info(&format!("Reprompted: {}", rewritten));
                    }
                    rewritten
                }
                Err(error) => {
                    self.report_error(&error);
                    return false;
                }
            }
        } else {
            text.to_string()
        };

        self.conversation.push(self.agent.user_message(&text));
        let result = run_turn(
            &self.agent,
            self.prompt.as_mut(),
            &mut self.conversation,
            self.options.temperature,
            self.options.enable_thinking,
        )
        .await;

        match result {
            Some(Ok(outcome)) => {
                self.render_outcome(&outcome);
                true
            }
            Some(Err(error)) => {
                self.report_error(&error);
                self.rollback(checkpoint);
                false
            }
            None => {
                self.rollback(checkpoint);
                self.prompt.render_info(
                    "Interrupt: Resetting conversation to before the last sent message...",
                );
                false
            }
        }
    }

    fn rollback(&mut self, checkpoint: usize) {
        let kept = self.conversation.messages()[..checkpoint].to_vec();
        self.conversation.replace_with(kept);
    }

    fn render_outcome(&mut self, outcome: &TurnOutcome) {
        if self.options.enable_thinking && !outcome.thinking.trim().is_empty() {
            self.prompt.render_thinking(&outcome.thinking);
        }
        self.prompt.render(&outcome.text);
        self.prompt
            .render_info(&format!("({:.1}s)", outcome.elapsed.as_secs_f64()));
    }

    fn report_error(&self, error: &anyhow::Error) {
        self.prompt.render_error(&describe_error(
            error,
            &self.agent.profile().name,
            &self.options.host,
        ));
    }

    async fn run_command(&mut self, command: Command) -> Flow {
        let (name, args) = match command {
            Command::Known { name, args } => (name, args),
            Command::Unknown(name) => {
                self.prompt
                    .render_error(&format!("Unknown command: {}. Type /help for the list.", name));
                return Flow::Continue;
            }
        };

        match name {
            CommandName::Help => self.prompt.render_info(&help_text()),
            CommandName::Exit => return Flow::Exit,
            CommandName::Clear => {
                self.conversation
                    .replace_with(vec![self.agent.system_message()]);
                self.prompt.render_info("Conversation cleared.");
            }
            CommandName::History => {
                let history = format_history(self.conversation.messages());
                self.prompt.render_info(&history);
            }
            CommandName::Save => {
                let name = args.first().map(String::as_str);
                match session_file::save_conversation(
                    &self.conversations_dir,
                    name,
                    self.conversation.messages(),
                ) {
                    Ok(path) => self
                        .prompt
                        .render_info(&format!("Conversation saved to {}", path.display())),
                    Err(error) => self
                        .prompt
                        .render_error(&format!("Failed to save conversation: {}", error)),
                }
            }
            CommandName::Load => match args.first() {
                None => self.prompt.render_error("Usage: /load <name>"),
                Some(name) => match session_file::load_conversation(&self.conversations_dir, name) {
                    Ok(messages) => {
                        let count = messages.len();
                        self.conversation.replace_with(messages);
                        self.prompt
                            .render_info(&format!("Loaded {} messages from {}", count, name));
                    }
                    Err(error) => self.prompt.render_error(&error.to_string()),
                },
            },
            CommandName::Conversations => self.list_conversations(),
            CommandName::Thinking => {
                self.options.enable_thinking = !self.options.enable_thinking;
                self.prompt
                    .render_info(&format!("Thinking {}", on_off(self.options.enable_thinking)));
            }
            CommandName::Temperature => match args.first() {
                None => self.prompt.render_info(&format!(
                    "Current temperature: {}\nUsage: /temperature <value> (0.0 to 2.0)",
                    self.options.temperature
                )),
                Some(value) => match parse_temperature(value) {
                    Ok(temperature) => {
                        self.options.temperature = temperature;
                        self.prompt
                            .render_info(&format!("Temperature set to {}", temperature));
                    }
                    Err(message) => self.prompt.render_error(&message),
                },
            },
            CommandName::Validate => match self.agent.tools() {
                Some(tools) => {
                    let required = !tools.require_confirmation();
                    tools.set_require_confirmation(required);
                    self.prompt
                        .render_info(&format!("Tool confirmation {}", on_off(required)));
                }
                None => self.prompt.render_error("No tools are configured for this model"),
            },
            CommandName::Reprompting => {
                self.options.reprompting = !self.options.reprompting;
                self.prompt
                    .render_info(&format!("Reprompting {}", on_off(self.options.reprompting)));
            }
            CommandName::Stats => self.stats(&args),
            CommandName::Cd => self.change_directory(&args),
            CommandName::Info => {
                let info = self.info();
                self.prompt.render_info(&info);
            }
            CommandName::Models => self.list_models().await,
            CommandName::Pull => match args.first() {
                None => self.prompt.render_error("Usage: /pull <model>"),
                Some(model) => self.pull_model(model).await,
            },
            CommandName::Unload => self.unload_model().await,
            CommandName::Prompt => self.show_system_prompt(),
            CommandName::Init => self.document_project().await,
        }
        Flow::Continue
    }

    async fn list_models(&self) {
        match self.agent.provider().list_models().await {
            Ok(models) if models.is_empty() => self
                .prompt
                .render_info("No models installed. Download one with /pull <model>"),
            Ok(models) => {
                let report = format_models(&models, &self.agent.profile().name);
                self.prompt.render_info(&report);
            }
            Err(error) => self
                .prompt
                .render_error(&format!("Failed to list models: {}", error)),
        }
    }

    async fn pull_model(&mut self, model: &str) {
        self.prompt.render_info(&format!("Downloading {}...", model));
        self.prompt.show_busy();
        let result = async {
            let mut updates = self.agent.provider().pull_model(model).await?;
            while let Some(update) = updates.next().await {
                self.prompt.update_busy(&format_pull_progress(&update?));
            }
            anyhow::Ok(())
        }
        .await;
        self.prompt.hide_busy();

        match result {
            Ok(()) => self
                .prompt
                .render_info(&format!("Model {} downloaded.", model)),
            Err(error) => self
                .prompt
                .render_error(&format!("Failed to pull model: {}", error)),
        }
    }

    async fn unload_model(&self) {
        let model = &self.agent.profile().name;
        match self.agent.provider().unload_model(model).await {
            Ok(()) => self.prompt.render_info(&format!(
                "Model {} unloaded from memory. It is loaded again with your next message.",
                model
            )),
            Err(error) => self
                .prompt
                .render_error(&format!("Failed to unload model: {}", error)),
        }
    }

    fn show_system_prompt(&mut self) {
        let system_prompt = self.agent.profile().system_prompt.clone();
        if system_prompt.trim().is_empty() {
            self.prompt
                .render_error("No system prompt configured for this model");
            return;
        }
        self.prompt.render_info(&format!(
            "System prompt for {}:",
            self.agent.profile().name
        ));
        self.prompt.render(&system_prompt);
        self.prompt.render_info(&prompt_statistics(&system_prompt));
    }

    /// Ask the model to write AGENTS.md in a conversation of its own, leaving
    /// the session's conversation untouched
    async fn document_project(&mut self) {
        let instructions = match init_instructions(PROJECT_NOTES_FILE) {
            Ok(instructions) => instructions,
            Err(error) => {
                self.prompt.render_error(&format!(
                    "Failed to generate {}: {}",
                    PROJECT_NOTES_FILE, error
                ));
                return;
            }
        };
        self.prompt.render_info(&format!(
            "Analysing the project to write {}...",
            PROJECT_NOTES_FILE
        ));

        let mut conversation = Conversation::new();
        conversation.push(self.agent.system_message());
        conversation.push(Message::user().with_text(instructions));
        let result = run_turn(
            &self.agent,
            self.prompt.as_mut(),
            &mut conversation,
            INIT_TEMPERATURE,
            self.options.enable_thinking,
        )
        .await;

        match result {
            Some(Ok(outcome)) => {
                self.render_outcome(&outcome);
                self.prompt.render_info(&format!(
                    "{} generation finished.",
                    PROJECT_NOTES_FILE
                ));
            }
            Some(Err(error)) => self.report_error(&error),
            None => self
                .prompt
                .render_info(&format!("Interrupt: {} generation stopped.", PROJECT_NOTES_FILE)),
        }
    }

    fn list_conversations(&self) {
        match session_file::list_conversations(&self.conversations_dir) {
            Ok(entries) if entries.is_empty() => self.prompt.render_info(&format!(
                "No saved conversations in {}",
                self.conversations_dir.display()
            )),
            Ok(entries) => {
                let mut lines = vec![format!("Saved conversations in {}:", self.conversations_dir.display())];
                for entry in entries {
                    lines.push(format!(
                        "  {:<40} {}  {:>8} bytes",
                        entry.name,
                        entry.modified.format("%Y-%m-%d %H:%M"),
                        entry.size
                    ));
                }
                self.prompt.render_info(&lines.join("\n"));
            }
            Err(error) => self
                .prompt
                .render_error(&format!("Failed to list conversations: {}", error)),
        }
    }

    fn stats(&self, args: &[String]) {
        let store = self.agent.stats();
        if args.first().map(String::as_str) == Some("reset") {
            let model = args.get(1).map(String::as_str);
            store.reset(model);
            self.prompt.render_info(&match model {
                Some(model) => format!("Statistics reset for {}", model),
                None => "Statistics reset".to_string(),
            });
            return;
        }

        let snapshot = store.snapshot();
        if args.is_empty() {
            if snapshot.is_empty() {
                self.prompt
                    .render_info("No statistics available yet. Start chatting to generate stats!");
                return;
            }
            let report: Vec<String> = snapshot
                .iter()
                .map(|(model, stats)| format_stats(model, stats))
                .collect();
            self.prompt.render_info(&report.join("\n\n"));
            return;
        }

        let model = args.join(" ");
        match snapshot.get(&model) {
            Some(stats) => self.prompt.render_info(&format_stats(&model, stats)),
            None => self
                .prompt
                .render_error(&format!("No statistics found for model: {}", model)),
        }
    }

    fn change_directory(&self, args: &[String]) {
        let target = if args.is_empty() {
            dirs::home_dir()
        } else {
            Some(expand_home(&args.join(" ")))
        };
        let Some(target) = target else {
            self.prompt.render_error("Could not determine the home directory");
            return;
        };

        if !target.exists() {
            self.prompt
                .render_error(&format!("Directory not found: {}", target.display()));
            return;
        }
        if !target.is_dir() {
            self.prompt
                .render_error(&format!("Not a directory: {}", target.display()));
            return;
        }
        match std::env::set_current_dir(&target).and_then(|_| std::env::current_dir()) {
            Ok(current) => self
                .prompt
                .render_info(&format!("Changed directory to: {}", current.display())),
            Err(error) => self
                .prompt
                .render_error(&format!("Cannot change to {}: {}", target.display(), error)),
        }
    }

    fn info(&self) -> String {
        let profile = self.agent.profile();
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (tools, confirmation) = match self.agent.tools() {
            Some(tools) => (
                tools.names().join(", "),
                on_off(tools.require_confirmation()).to_string(),
            ),
            None => ("none".to_string(), "n/a".to_string()),
        };
        [
            format!("Model:             {}", profile.name),
            format!("Host:              {}", self.options.host),
            format!("Temperature:       {}", self.options.temperature),
            format!("Thinking:          {}", on_off(self.options.enable_thinking)),
            format!("Thinking budget:   {} tokens", self.agent.thinking_budget()),
            format!("Reprompting:       {}", on_off(self.options.reprompting)),
            format!("Image mode:        {}", on_off(profile.image_mode)),
            format!("Tool confirmation: {}", confirmation),
            format!("Tools:             {}", tools),
            format!("Working directory: {}", cwd),
            format!("Messages:          {}", self.conversation.len()),
        ]
        .join("\n")
    }
}

/// Run one turn behind the busy indicator. `None` when the user pressed Ctrl-C.
async fn run_turn<P: Prompt + ?Sized>(
    agent: &Agent,
    prompt: &mut P,
    conversation: &mut Conversation,
    temperature: f32,
    enable_thinking: bool,
) -> Option<Result<TurnOutcome>> {
    prompt.show_busy();
    let result = tokio::select! {
        result = agent.process_turn(conversation, temperature, enable_thinking) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    prompt.hide_busy();
    result
}

/// What to tell the user when a turn fails
pub fn describe_error(error: &anyhow::Error, model: &str, host: &str) -> String {
    match error.downcast_ref::<ProviderError>() {
        Some(ProviderError::ModelNotFound(_)) => {
            format!("Model {} not found! Pull it with: ollama pull {}", model, model)
        }
        Some(ProviderError::Connection { .. }) => {
            format!("Cannot reach Ollama at {}. Is `ollama serve` running?", host)
        }
        _ => format!("Error: {}", error),
    }
}

fn format_history(messages: &[Message]) -> String {
    let mut lines = Vec::new();
    for (index, message) in messages.iter().enumerate() {
        if message.role == Role::System {
            continue;
        }
        let mut text: String = message.content.chars().take(HISTORY_PREVIEW_CHARS).collect();
        if message.content.chars().count() > HISTORY_PREVIEW_CHARS {
            text.push_str("...");
        }
        for call in &message.tool_calls {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&format!("[calls {}]", call.name()));
        }
        if !message.images.is_empty() {
            text.push_str(&format!(" [{} image(s)]", message.images.len()));
        }
        lines.push(format!("{:>3}. {:<9} {}", index, message.role.as_str(), text.replace('\n', " ")));
    }
    if lines.is_empty() {
        return "The conversation is empty.".to_string();
    }
    lines.join("\n")
}

pub fn format_stats(model: &str, stats: &ModelStats) -> String {
    let mut lines = vec![
        model.to_string(),
        format!("  Requests:        {}", stats.total_requests),
        format!("  Thinking tokens: {}", stats.total_thinking_tokens),
        format!("  Response tokens: {}", stats.total_response_tokens),
        format!("  Total time:      {:.1}s", stats.total_time_seconds),
        format!("  Speed:           {:.1} tokens/s", stats.tokens_per_second()),
    ];
    if stats.reprompting_requests > 0 {
        lines.push(format!(
            "  Reprompting:     {} requests, {} tokens, {:.1}s",
            stats.reprompting_requests, stats.reprompting_tokens, stats.reprompting_time_seconds
        ));
    }
    lines.join("\n")
}

fn format_models(models: &[ModelInfo], current: &str) -> String {
    let mut lines = vec![format!("{} model(s) installed:", models.len())];
    for model in models {
        let marker = if is_same_model(&model.name, current) {
            "*"
        } else {
            " "
        };
        let modified = model
            .modified_at
            .as_deref()
            .map(|m| m.chars().take(10).collect::<String>())
            .unwrap_or_default();
        lines.push(format!(
            "{} {:<36} {:>9}  {}",
            marker,
            model.name,
            format_size(model.size),
            modified
        ));
    }
    lines.join("\n")
}

/// `llama3.1` and `llama3.1:latest` name the same model
fn is_same_model(installed: &str, configured: &str) -> bool {
    installed == configured || installed.strip_suffix(":latest") == Some(configured)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if size < 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", size, unit)
}

fn format_pull_progress(progress: &PullProgress) -> String {
    match (progress.completed, progress.total) {
        (Some(completed), Some(total)) if total > 0 => format!(
            "{} {}% ({} / {})",
            progress.status,
            completed * 100 / total,
            format_size(completed),
            format_size(total)
        ),
        _ => progress.status.clone(),
    }
}

fn prompt_statistics(prompt: &str) -> String {
    format!(
        "{} characters, {} words, {} lines",
        prompt.chars().count(),
        prompt.split_whitespace().count(),
        prompt.lines().count()
    )
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    Path::new(path).to_path_buf()
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}
