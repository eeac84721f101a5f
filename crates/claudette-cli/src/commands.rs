use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, EnumIter, EnumString};

/// Slash commands understood by the interactive session
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum CommandName {
    Help,
    #[strum(serialize = "exit", serialize = "quit")]
    Exit,
    Clear,
    History,
    Save,
    Load,
    Conversations,
    Thinking,
    Temperature,
    Validate,
    Reprompting,
    Stats,
    Cd,
    Info,
    #[strum(serialize = "models", serialize = "list")]
    Models,
    Pull,
    Unload,
    Prompt,
    Init,
}

impl CommandName {
    pub fn usage(self) -> &'static str {
        match self {
            CommandName::Help => "/help",
            CommandName::Exit => "/exit or /quit",
            CommandName::Clear => "/clear",
            CommandName::History => "/history",
            CommandName::Save => "/save [name]",
            CommandName::Load => "/load <name>",
            CommandName::Conversations => "/conversations",
            CommandName::Thinking => "/thinking",
            CommandName::Temperature => "/temperature <value>",
            CommandName::Validate => "/validate",
            CommandName::Reprompting => "/reprompting",
            CommandName::Stats => "/stats [model | reset [model]]",
            CommandName::Cd => "/cd <directory>",
            CommandName::Info => "/info",
            CommandName::Models => "/models or /list",
            CommandName::Pull => "/pull <model>",
            CommandName::Unload => "/unload",
            CommandName::Prompt => "/prompt",
            CommandName::Init => "/init",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            CommandName::Help => "Show this help",
            CommandName::Exit => "Leave the session",
            CommandName::Clear => "Clear the conversation history",
            CommandName::History => "Show the conversation history",
            CommandName::Save => "Save the conversation to .claudette/conversations",
            CommandName::Load => "Load a saved conversation",
            CommandName::Conversations => "List saved conversations",
            CommandName::Thinking => "Toggle the model's thinking channel",
            CommandName::Temperature => "Set the temperature (0.0 to 2.0)",
            CommandName::Validate => "Toggle confirmation before tools change anything",
            CommandName::Reprompting => "Toggle rewriting of your messages before they are sent",
            CommandName::Stats => "Show or reset usage statistics per model",
            CommandName::Cd => "Change the working directory",
            CommandName::Info => "Show the session settings",
            CommandName::Models => "List the models installed on the Ollama host",
            CommandName::Pull => "Download a model to the Ollama host",
            CommandName::Unload => "Release the current model from the host's memory",
            CommandName::Prompt => "Show the system prompt",
            CommandName::Init => "Have the model document this project in AGENTS.md",
        }
    }
}

/// A parsed slash command with its raw arguments
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Known { name: CommandName, args: Vec<String> },
    Unknown(String),
}

/// `None` when the input is a regular message
pub fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args = parts.map(str::to_string).collect();

    match name.to_lowercase().parse::<CommandName>() {
        Ok(name) => Some(Command::Known { name, args }),
        Err(_) => Some(Command::Unknown(format!("/{}", name))),
    }
}

pub fn help_text() -> String {
    let mut lines = vec!["Commands:".to_string()];
    for command in CommandName::iter() {
        lines.push(format!("  {:<32} {}", command.usage(), command.description()));
    }
    lines.join("\n")
}

/// Parse a `/temperature` argument
pub fn parse_temperature(value: &str) -> Result<f32, String> {
    let temperature: f32 = value
        .parse()
        .map_err(|_| "Temperature must be a number".to_string())?;
    if !(0.0..=2.0).contains(&temperature) {
        return Err("Temperature must be between 0.0 and 2.0".to_string());
    }
    Ok(temperature)
}
