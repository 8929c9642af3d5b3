//! Scripted transport for testing without network access

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::provider::{ChatRequest, ChatResponse, LlmError, Transport, Usage};

/// What a scripted endpoint does on its next call
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed with this content
    Reply(String),
    /// Fail with this error
    Fail(LlmError),
    /// Succeed with an empty payload
    Empty,
    /// Sleep before resolving the inner outcome
    Delay(Duration, Box<MockOutcome>),
}

#[derive(Debug, Default)]
struct Script {
    queue: VecDeque<MockOutcome>,
    fallback: Option<MockOutcome>,
}

/// A transport whose per-endpoint behaviour is scripted up front.
///
/// Each endpoint consumes its queued outcomes in order and then repeats its
/// fallback. Endpoints with no script echo the last user message.
#[derive(Debug, Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for an endpoint
    pub fn script(self, endpoint: &str, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        self.scripts
            .lock()
            .entry(endpoint.to_string())
            .or_default()
            .queue
            .extend(outcomes);
        self
    }

    /// Outcome repeated once an endpoint's queue is drained
    pub fn always(self, endpoint: &str, outcome: MockOutcome) -> Self {
        self.scripts
            .lock()
            .entry(endpoint.to_string())
            .or_default()
            .fallback = Some(outcome);
        self
    }

    /// Endpoint that always fails with a transport error
    pub fn failing(self, endpoint: &str) -> Self {
        self.always(
            endpoint,
            MockOutcome::Fail(LlmError::Transport("connection refused".to_string())),
        )
    }

    /// Endpoint that always replies with `content`
    pub fn replying(self, endpoint: &str, content: &str) -> Self {
        self.always(endpoint, MockOutcome::Reply(content.to_string()))
    }

    /// Total number of calls across all endpoints
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of calls made to one endpoint
    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == endpoint).count()
    }

    /// Endpoint names in call order
    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn next_outcome(&self, endpoint: &str) -> Option<MockOutcome> {
        let mut scripts = self.scripts.lock();
        let script = scripts.get_mut(endpoint)?;
        script.queue.pop_front().or_else(|| script.fallback.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &ChatRequest,
    ) -> Result<ChatResponse, LlmError> {
        self.calls.lock().push(endpoint.name.clone());

        let mut outcome = self.next_outcome(&endpoint.name).unwrap_or_else(|| {
            let echo = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            MockOutcome::Reply(format!("[{}] {}", endpoint.name, echo))
        });

        let mut waited = Duration::ZERO;
        let content = loop {
            match outcome {
                MockOutcome::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    waited += delay;
                    outcome = *inner;
                }
                MockOutcome::Reply(content) => break content,
                MockOutcome::Empty => break String::new(),
                MockOutcome::Fail(err) => return Err(err),
            }
        };

        Ok(ChatResponse {
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: (content.len() / 4) as u32,
                total_tokens: 10 + (content.len() / 4) as u32,
            }),
            content,
            model: request.model.clone(),
            endpoint: endpoint.name.clone(),
            finish_reason: Some("stop".to_string()),
            latency_ms: waited.as_millis() as u64,
        })
    }
}
