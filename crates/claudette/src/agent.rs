use anyhow::Result;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::conversation::Conversation;
use crate::errors::AgentError;
use crate::images::extract_images;
use crate::loop_guard::{BudgetPolicy, GuardDecision, LoopGuard, ModelNameBudgetPolicy, PassSummary};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};
use crate::prompt_template::reprompt_instructions;
use crate::providers::base::{ChatOptions, Provider};
use crate::stats::{NoopStats, StatsEvent, StatsStore};
use crate::tool_parser::parse_tool_call;
use crate::tools::ToolRegistry;

const REPROMPT_TEMPERATURE: f32 = 0.3;

/// The model a session talks to and how it is addressed
#[derive(Debug, Clone, PartialEq)]
pub struct ModelProfile {
    pub name: String,
    /// Image paths in user messages are sent as images
    pub image_mode: bool,
    pub system_prompt: String,
}

impl ModelProfile {
    pub fn new<N: Into<String>, P: Into<String>>(name: N, system_prompt: P) -> Self {
        Self {
            name: name.into(),
            image_mode: false,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn with_image_mode(mut self, image_mode: bool) -> Self {
        self.image_mode = image_mode;
        self
    }
}

/// Result of one call to [`Agent::process_turn`]
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub text: String,
    pub elapsed: Duration,
    /// Everything the model put on the thinking channel during the turn
    pub thinking: String,
}

/// Display hooks for a running turn. The observer only sees the stream, it
/// never touches the conversation.
pub trait ReplyObserver: Send + Sync {
    fn on_pass_start(&self) {}

    fn on_content(&self, _delta: &str) {}

    fn on_thinking(&self, _delta: &str) {}

    fn on_tool_call(&self, _call: &ToolCall) {}

    fn on_tool_result(&self, _call: &ToolCall, _result: &str) {}

    fn on_guard_retry(&self, _thinking_tokens: u32) {}
}

pub struct SilentObserver;

impl ReplyObserver for SilentObserver {}

/// What a single streamed pass produced
#[derive(Debug, Default)]
struct PassOutput {
    content: String,
    thinking: String,
    tool_calls: Vec<ToolCall>,
    thinking_tokens: u32,
    response_tokens: u32,
}

/// Agent integrates a chat provider with the tool registry and drives the
/// request/tool/request cycle of a conversation turn
pub struct Agent {
    provider: Box<dyn Provider>,
    profile: ModelProfile,
    tools: Option<ToolRegistry>,
    stats: Arc<dyn StatsStore>,
    budget_policy: Box<dyn BudgetPolicy>,
    observer: Arc<dyn ReplyObserver>,
}

impl Agent {
    pub fn new(provider: Box<dyn Provider>, profile: ModelProfile) -> Self {
        Self {
            provider,
            profile,
            tools: None,
            stats: Arc::new(NoopStats),
            budget_policy: Box::new(ModelNameBudgetPolicy),
            observer: Arc::new(SilentObserver),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsStore>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_budget_policy(mut self, policy: Box<dyn BudgetPolicy>) -> Self {
        self.budget_policy = policy;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ReplyObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    pub fn tools(&self) -> Option<&ToolRegistry> {
        self.tools.as_ref()
    }

    pub fn stats(&self) -> &Arc<dyn StatsStore> {
        &self.stats
    }

    /// Thinking budget the loop guard applies to this model
    pub fn thinking_budget(&self) -> u32 {
        self.budget_policy.thinking_budget(&self.profile.name)
    }

    pub fn system_message(&self) -> Message {
        Message::system().with_text(&self.profile.system_prompt)
    }

    /// Build the user message for `text`. With image mode on, image files named
    /// in the text are attached and their paths dropped from the content.
    pub fn user_message(&self, text: &str) -> Message {
        if !self.profile.image_mode {
            return Message::user().with_text(text);
        }
        let extracted = extract_images(text);
        if !extracted.images.is_empty() {
            tracing::debug!(count = extracted.images.len(), "attached images to the user message");
        }
        Message::user()
            .with_text(extracted.text)
            .with_images(extracted.images)
    }

    /// Answer the conversation, running any tools the model asks for until it
    /// produces a reply without tool calls.
    ///
    /// The conversation is only appended to. Backend failures end the turn and
    /// are returned as errors; everything else ends up in the conversation.
    pub async fn process_turn(
        &self,
        conversation: &mut Conversation,
        temperature: f32,
        enable_thinking: bool,
    ) -> Result<TurnOutcome> {
        let start = Instant::now();
        let mut guard = LoopGuard::for_model(self.budget_policy.as_ref(), &self.profile.name);
        let definitions = self
            .tools
            .as_ref()
            .map(|registry| registry.definitions())
            .unwrap_or_default();
        let known_tools = self
            .tools
            .as_ref()
            .map(|registry| registry.names())
            .unwrap_or_default();
        let mut thinking = String::new();

        loop {
            let options = ChatOptions {
                temperature: Some(temperature),
                max_tokens: Some(guard.generation_limit()),
                think: enable_thinking,
            };
            let pass_start = Instant::now();
            let output = self.stream_pass(conversation, &definitions, &options).await?;
            thinking.push_str(&output.thinking);

            self.stats.record(&StatsEvent {
                model: self.profile.name.clone(),
                thinking_tokens: output.thinking_tokens as u64,
                response_tokens: output.response_tokens as u64,
                elapsed: pass_start.elapsed(),
                reprompting: false,
            });

            let summary = PassSummary {
                thinking_tokens: output.thinking_tokens,
                content: &output.content,
                tool_calls: output.tool_calls.len(),
            };
            match guard.assess(&summary) {
                GuardDecision::Continue => {}
                GuardDecision::Retry => {
                    self.observer.on_guard_retry(output.thinking_tokens);
                    conversation.push(guard.correction_message());
                    continue;
                }
                GuardDecision::Abort => {
                    let text = guard.diagnostic(&thinking);
                    conversation.push(Message::assistant().with_text(&text));
                    return Ok(TurnOutcome {
                        text,
                        elapsed: start.elapsed(),
                        thinking,
                    });
                }
            }

            let PassOutput {
                mut content,
                mut tool_calls,
                ..
            } = output;

            if tool_calls.is_empty() && !known_tools.is_empty() && !content.trim().is_empty() {
                if let Some(parsed) = parse_tool_call(&content, &known_tools) {
                    tracing::debug!(
                        tool = parsed.call.name(),
                        strategy = %parsed.strategy,
                        "recovered a tool call from the model's text"
                    );
                    content = parsed.remaining_text;
                    tool_calls.push(parsed.call);
                }
            }

            if tool_calls.is_empty() {
                conversation.push(Message::assistant().with_text(&content));
                return Ok(TurnOutcome {
                    text: content,
                    elapsed: start.elapsed(),
                    thinking,
                });
            }

            conversation.push(
                Message::assistant()
                    .with_text(&content)
                    .with_tool_calls(tool_calls.clone()),
            );

            // One at a time, in the order the model asked for them
            for call in &tool_calls {
                self.observer.on_tool_call(call);
                let result = self.dispatch_tool_call(call).await;
                self.observer.on_tool_result(call, &result);
                conversation.push(Message::tool().with_text(&result));
            }
        }
    }

    async fn dispatch_tool_call(&self, call: &ToolCall) -> String {
        let registry = match &self.tools {
            Some(registry) if registry.contains(call.name()) => registry,
            Some(registry) => return registry.execute(call.name(), call.arguments()).await,
            None => return AgentError::ToolNotFound(call.name().to_string()).to_tool_result(),
        };
        if let Some(reason) = call.invalid_arguments() {
            tracing::debug!(tool = call.name(), reason, "model sent undecodable tool arguments");
            return AgentError::invalid(call.name(), reason).to_tool_result();
        }
        registry.execute(call.name(), call.arguments()).await
    }

    /// Stream one request to the backend and collect what it produced
    async fn stream_pass(
        &self,
        conversation: &Conversation,
        definitions: &[Tool],
        options: &ChatOptions,
    ) -> Result<PassOutput> {
        tracing::debug!(
            model = %self.profile.name,
            messages = conversation.len(),
            max_tokens = ?options.max_tokens,
            "starting pass"
        );
        self.observer.on_pass_start();

        let mut stream = self
            .provider
            .stream_chat(&self.profile.name, conversation.messages(), definitions, options)
            .await?;

        let mut output = PassOutput::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if !chunk.thinking.is_empty() {
                output.thinking_tokens += 1;
                output.thinking.push_str(&chunk.thinking);
                self.observer.on_thinking(&chunk.thinking);
            }
            if !chunk.content.is_empty() {
                output.response_tokens += 1;
                output.content.push_str(&chunk.content);
                self.observer.on_content(&chunk.content);
            }
            if !chunk.tool_calls.is_empty() {
                output.tool_calls = chunk.tool_calls;
                break;
            }
            if chunk.done {
                break;
            }
        }

        tracing::debug!(
            thinking_tokens = output.thinking_tokens,
            response_tokens = output.response_tokens,
            tool_calls = output.tool_calls.len(),
            "pass finished"
        );
        Ok(output)
    }

    /// Rewrite a user message so the model understands it better. Runs one
    /// tool-less pass and falls back to the original text when the model
    /// returns nothing.
    pub async fn reprompt(&self, user_message: &str) -> Result<String> {
        let start = Instant::now();
        let instructions = reprompt_instructions(&self.profile.system_prompt)?;
        let messages = vec![
            Message::system().with_text(instructions),
            Message::user().with_text(format!(
                "Rewrite this message and return only the result: <UserMessage>{}</UserMessage>",
                user_message
            )),
        ];
        let options = ChatOptions {
            temperature: Some(REPROMPT_TEMPERATURE),
            max_tokens: None,
            think: false,
        };

        let mut stream = self
            .provider
            .stream_chat(&self.profile.name, &messages, &[], &options)
            .await?;
        let mut rewritten = String::new();
        let mut response_tokens = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if !chunk.content.is_empty() {
                response_tokens += 1;
                rewritten.push_str(&chunk.content);
                self.observer.on_content(&chunk.content);
            }
            if chunk.done {
                break;
            }
        }

        self.stats.record(&StatsEvent {
            model: self.profile.name.clone(),
            thinking_tokens: 0,
            response_tokens,
            elapsed: start.elapsed(),
            reprompting: true,
        });

        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            return Ok(user_message.to_string());
        }
        Ok(rewritten.to_string())
    }
}
