use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::role::Role;

/// The ordered message history of one session.
///
/// The response loop only ever appends. `clear` and `replace_with` exist for the
/// session layer (clearing or loading a saved conversation between turns).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn replace_with(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Number of tool calls requested by assistant messages from `start` on
    pub fn tool_call_count(&self, start: usize) -> usize {
        self.messages
            .iter()
            .skip(start)
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.tool_calls.len())
            .sum()
    }

    /// Number of tool results from `start` on
    pub fn tool_result_count(&self, start: usize) -> usize {
        self.messages
            .iter()
            .skip(start)
            .filter(|m| m.role == Role::Tool)
            .count()
    }
}
