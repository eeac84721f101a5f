use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use claudette::agent::{Agent, ModelProfile};
use claudette::loop_guard::FixedBudgetPolicy;
use claudette::prompt_template::system_prompt;
use claudette::providers::base::Provider;
use claudette::providers::configs::OllamaProviderConfig;
use claudette::providers::ollama::OllamaProvider;
use claudette::stats::{NoopStats, StatsStore, YamlStatsStore};
use claudette::tools::{Confirmation, ToolContext, ToolRegistry};

mod commands;
mod config;
mod prompt;
mod session;

use crate::config::{Overrides, Settings};
use crate::prompt::cliclack::{TerminalConfirmation, TerminalQuestion};
use crate::prompt::rustyline::RustylinePrompt;
use crate::session::{describe_error, Session, SessionOptions};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model to use (overrides the configuration)
    #[arg(short, long)]
    model: Option<String>,

    /// Ollama host, e.g. http://localhost:11434
    #[arg(long)]
    host: Option<String>,

    /// Configuration file (defaults to ./config.yaml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run tools without asking for confirmation
    #[arg(long)]
    no_confirm: bool,

    /// Enable the model's thinking channel
    #[arg(long)]
    thinking: bool,

    /// Sampling temperature, 0.0 to 2.0
    #[arg(short, long)]
    temperature: Option<f32>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive session (the default)
    Session,

    /// Answer a single message and exit
    Run {
        /// The message to send
        #[arg(short, long)]
        text: String,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("CLAUDETTE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("claudette={0},claudette_cli={0}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let overrides = Overrides {
        model: cli.model.clone(),
        host: cli.host.clone(),
        temperature: cli.temperature,
        no_confirm: cli.no_confirm,
        thinking: cli.thinking,
    };
    let settings = Settings::load(cli.config.as_deref(), &overrides)?;

    let provider = OllamaProvider::new(OllamaProviderConfig {
        host: settings.host.clone(),
        keep_alive: settings.keep_alive.clone(),
        ..Default::default()
    })?;
    check_backend(&provider, &settings).await?;

    let agent = build_agent(provider, &settings)?;
    let options = SessionOptions {
        temperature: settings.temperature,
        enable_thinking: settings.enable_thinking,
        reprompting: false,
        host: settings.host.clone(),
    };

    let prompt = RustylinePrompt::new(history_file())?;
    let agent = agent.with_observer(prompt.observer());
    let mut session = Session::new(agent, Box::new(prompt), options);

    match cli.command {
        Some(Command::Run { text }) => session.headless_start(&text).await,
        Some(Command::Session) | None => session.start().await,
    }
}

/// Fail early when Ollama is unreachable, and warn about a model it does not have
async fn check_backend(provider: &OllamaProvider, settings: &Settings) -> Result<()> {
    let models = match provider.list_models().await {
        Ok(models) => models,
        Err(error) => {
            eprintln!(
                "{}",
                style(describe_error(&error, &settings.model, &settings.host)).red()
            );
            return Err(error);
        }
    };

    let installed = models
        .iter()
        .any(|m| m.name == settings.model || m.name == format!("{}:latest", settings.model));
    if !installed {
        eprintln!(
            "{}",
            style(format!(
                "Model {} is not installed on {}. Pull it with: /pull {}",
                settings.model, settings.host, settings.model
            ))
            .yellow()
        );
    }
    Ok(())
}

fn build_agent(provider: OllamaProvider, settings: &Settings) -> Result<Agent> {
    let tools = if settings.tools {
        let confirmation = Arc::new(Confirmation::new(
            settings.require_confirmation,
            Box::new(TerminalConfirmation),
        ));
        let context = ToolContext::new(confirmation, Arc::new(TerminalQuestion))?;
        Some(ToolRegistry::builtin(&context))
    } else {
        None
    };

    let definitions = tools
        .as_ref()
        .map(|registry| registry.definitions())
        .unwrap_or_default();
    let prompt = match &settings.system_prompt {
        Some(prompt) => prompt.clone(),
        None => system_prompt(&definitions)?,
    };

    let profile = ModelProfile::new(&settings.model, prompt).with_image_mode(settings.image_mode);
    let mut agent = Agent::new(Box::new(provider), profile).with_stats(stats_store());
    if let Some(tools) = tools {
        agent = agent.with_tools(tools);
    }
    if let Some(budget) = settings.thinking_budget {
        agent = agent.with_budget_policy(Box::new(FixedBudgetPolicy(budget)));
    }
    Ok(agent)
}

fn stats_store() -> Arc<dyn StatsStore> {
    match dirs::data_dir() {
        Some(dir) => Arc::new(YamlStatsStore::new(dir.join("claudette").join("stats.yaml"))),
        None => {
            tracing::warn!("no data directory, usage statistics will not be kept");
            Arc::new(NoopStats)
        }
    }
}

fn history_file() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claudette").join("history.txt"))
}
