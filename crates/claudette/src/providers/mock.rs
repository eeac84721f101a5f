use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{ChatChunk, ChatOptions, ChatStream, Provider};

/// One scripted streamed pass: the chunks to emit, or an error raised when the pass starts
pub type MockPass = Result<Vec<ChatChunk>, String>;

/// A mock provider that replays pre-configured passes for testing
#[derive(Clone)]
pub struct MockProvider {
    passes: Arc<Mutex<Vec<MockPass>>>,
    requests: Arc<Mutex<Vec<(Vec<Message>, ChatOptions)>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of passes
    pub fn new(passes: Vec<MockPass>) -> Self {
        Self {
            passes: Arc::new(Mutex::new(passes)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every request seen so far, in order
    pub fn requests(&self) -> Vec<(Vec<Message>, ChatOptions)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn options(&self) -> Vec<ChatOptions> {
        self.requests().into_iter().map(|(_, o)| o).collect()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn stream_chat(
        &self,
        _model: &str,
        messages: &[Message],
        _tools: &[Tool],
        options: &ChatOptions,
    ) -> Result<ChatStream> {
        self.requests
            .lock()
            .unwrap()
            .push((messages.to_vec(), options.clone()));

        let mut passes = self.passes.lock().unwrap();
        let pass = if passes.is_empty() {
            // Empty pass if no more pre-configured passes
            Ok(vec![ChatChunk::done()])
        } else {
            passes.remove(0)
        };

        match pass {
            Ok(chunks) => Ok(Box::pin(futures::stream::iter(
                chunks.into_iter().map(Ok::<_, anyhow::Error>),
            ))),
            Err(e) => Err(anyhow!(e)),
        }
    }
}
