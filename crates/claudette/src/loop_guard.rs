//! Bounds how much a model may think before it has to answer.
//!
//! Every pass is sent with a generation ceiling of the model's thinking budget
//! plus a fixed response allowance. A pass that spends most of the budget on
//! thinking and produces neither content nor tool calls is stuck: the first one
//! is retried under a much smaller ceiling, a second consecutive one aborts the
//! turn with a diagnostic answer.

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::message::Message;

/// Tokens granted on top of the thinking budget for the visible answer
pub const RESPONSE_ALLOWANCE: u32 = 2000;
/// Share of the budget a contentless pass has to burn to count as stuck
pub const STUCK_RATIO: f64 = 0.9;
/// Generation ceiling for the single retry after a stuck pass
pub const RETRY_CEILING: u32 = 1000;

pub const REASONING_BUDGET: u32 = 4000;
pub const LARGE_MODEL_BUDGET: u32 = 4000;
pub const MEDIUM_MODEL_BUDGET: u32 = 3000;
pub const DEFAULT_BUDGET: u32 = 1500;

const REASONING_TAGS: [&str; 4] = ["qwq", "reason", "think", "magistral"];
const EXCERPT_CHARS: usize = 400;

lazy_static! {
    static ref PARAMETER_SIZE: Regex =
        Regex::new(r"(?i)(?:^|[^a-z0-9.])(\d+(?:\.\d+)?)b(?:$|[^a-z0-9])").unwrap();
}

/// Chooses the thinking-token budget for a model
pub trait BudgetPolicy: Send + Sync {
    fn thinking_budget(&self, model: &str) -> u32;
}

/// Guesses the budget from the model name: reasoning-tagged and larger models
/// get more room than small general models.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelNameBudgetPolicy;

impl BudgetPolicy for ModelNameBudgetPolicy {
    fn thinking_budget(&self, model: &str) -> u32 {
        if is_reasoning_model(model) {
            return REASONING_BUDGET;
        }
        match parameter_size(model) {
            Some(size) if size >= 30.0 => LARGE_MODEL_BUDGET,
            Some(size) if size >= 14.0 => MEDIUM_MODEL_BUDGET,
            _ => DEFAULT_BUDGET,
        }
    }
}

/// The same budget for every model, set from configuration
#[derive(Debug, Clone, Copy)]
pub struct FixedBudgetPolicy(pub u32);

impl BudgetPolicy for FixedBudgetPolicy {
    fn thinking_budget(&self, _model: &str) -> u32 {
        self.0
    }
}

pub fn is_reasoning_model(model: &str) -> bool {
    let name = model.to_lowercase();
    if REASONING_TAGS.iter().any(|tag| name.contains(tag)) {
        return true;
    }
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|part| part == "r1")
}

/// Largest parameter count in billions found in a model name, e.g. 30 for `qwen3:30b-a3b`
pub fn parameter_size(model: &str) -> Option<f64> {
    PARAMETER_SIZE
        .captures_iter(model)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .fold(None, |max: Option<f64>, size| {
            Some(max.map_or(size, |m| m.max(size)))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Normal,
    Retrying,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// The pass produced something; handle it normally
    Continue,
    /// Stuck once: append the correction and stream again
    Retry,
    /// Stuck twice in a row: end the turn with the diagnostic answer
    Abort,
}

/// What the guard needs to know about a finished pass
#[derive(Debug, Clone, Copy)]
pub struct PassSummary<'a> {
    pub thinking_tokens: u32,
    pub content: &'a str,
    pub tool_calls: usize,
}

#[derive(Debug, Clone)]
pub struct LoopGuard {
    budget: u32,
    state: GuardState,
}

impl LoopGuard {
    pub fn new(budget: u32) -> Self {
        Self {
            budget,
            state: GuardState::Normal,
        }
    }

    pub fn for_model(policy: &dyn BudgetPolicy, model: &str) -> Self {
        Self::new(policy.thinking_budget(model))
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// Maximum tokens the backend may generate in the next pass
    pub fn generation_limit(&self) -> u32 {
        match self.state {
            GuardState::Normal => self.budget + RESPONSE_ALLOWANCE,
            GuardState::Retrying | GuardState::Aborted => RETRY_CEILING.min(self.budget),
        }
    }

    /// Thinking tokens at which a contentless pass counts as stuck.
    /// During the retry this is measured against the reduced ceiling.
    pub fn stuck_threshold(&self) -> u32 {
        let basis = match self.state {
            GuardState::Normal => self.budget,
            GuardState::Retrying | GuardState::Aborted => RETRY_CEILING.min(self.budget),
        };
        (basis as f64 * STUCK_RATIO).ceil() as u32
    }

    pub fn is_stuck(&self, pass: &PassSummary<'_>) -> bool {
        pass.thinking_tokens >= self.stuck_threshold()
            && pass.content.trim().is_empty()
            && pass.tool_calls == 0
    }

    pub fn assess(&mut self, pass: &PassSummary<'_>) -> GuardDecision {
        if !self.is_stuck(pass) {
            self.state = GuardState::Normal;
            return GuardDecision::Continue;
        }
        match self.state {
            GuardState::Normal => {
                tracing::warn!(
                    thinking_tokens = pass.thinking_tokens,
                    budget = self.budget,
                    "model is stuck thinking, retrying with a reduced ceiling"
                );
                self.state = GuardState::Retrying;
                GuardDecision::Retry
            }
            GuardState::Retrying | GuardState::Aborted => {
                tracing::warn!(
                    thinking_tokens = pass.thinking_tokens,
                    budget = self.budget,
                    "model is still stuck after the retry, aborting the turn"
                );
                self.state = GuardState::Aborted;
                GuardDecision::Abort
            }
        }
    }

    /// System message appended before the retry
    pub fn correction_message(&self) -> Message {
        Message::system().with_text(
            "You have spent too long thinking without answering. Stop thinking now. \
             Answer the user's last request directly and concisely, or call the tool \
             you need right away.",
        )
    }

    /// Answer returned in place of a model response when the turn is aborted
    pub fn diagnostic(&self, thinking: &str) -> String {
        let mut text = format!(
            "The model exceeded its thinking limit ({} tokens) twice without producing an answer, \
             so this turn was stopped. Try rephrasing the request, disabling thinking with \
             /thinking, or using a larger model.",
            self.budget
        );
        let thinking = thinking.trim();
        if !thinking.is_empty() {
            let count = thinking.chars().count();
            let excerpt: String = thinking
                .chars()
                .skip(count.saturating_sub(EXCERPT_CHARS))
                .collect();
            let prefix = if count > EXCERPT_CHARS { "..." } else { "" };
            text.push_str(&format!("\n\nLast reasoning:\n{}{}", prefix, excerpt));
        }
        text
    }
}
