//! Provider-facing request/response types and the `Transport` trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::endpoint::Endpoint;

/// Errors from a single provider call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LlmError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Provider error{}: {message}", status_suffix(.status))]
    Provider { status: Option<u16>, message: String },
    #[error("Provider returned an empty response")]
    EmptyResponse,
    #[error("Endpoint not configured: {0}")]
    NotConfigured(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl LlmError {
    /// Whether another attempt against the same endpoint may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LlmError::NotConfigured(_))
    }

    /// Short stable label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Transport(_) => "transport",
            LlmError::Timeout(_) => "timeout",
            LlmError::Provider { .. } => "provider",
            LlmError::EmptyResponse => "empty_response",
            LlmError::NotConfigured(_) => "configuration",
        }
    }
}

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single role/content pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Generation options recognised by every provider.
///
/// | Option | Default | Effect |
/// |--------|---------|--------|
/// | `max_tokens` | 1024 | Upper bound on generated tokens (clamped to the endpoint budget) |
/// | `temperature` | 0.7 | Sampling temperature |
/// | `top_p` | unset | Nucleus sampling mass |
/// | `stop` | empty | Stop sequences |
/// | `presence_penalty` | unset | Penalise tokens already present |
/// | `frequency_penalty` | unset | Penalise frequent tokens |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            top_p: None,
            stop: Vec::new(),
            presence_penalty: None,
            frequency_penalty: None,
        }
    }
}

impl GenerationOptions {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Build options from an untyped JSON map.
    ///
    /// Unknown keys are ignored with a warning. Known keys with the wrong type
    /// keep their default and are also reported.
    pub fn from_map(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut options = Self::default();

        for (key, value) in map {
            let applied = match key.as_str() {
                "max_tokens" => value
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .map(|v| options.max_tokens = v),
                "temperature" => value.as_f64().map(|v| options.temperature = v as f32),
                "top_p" => value.as_f64().map(|v| options.top_p = Some(v as f32)),
                "presence_penalty" => value
                    .as_f64()
                    .map(|v| options.presence_penalty = Some(v as f32)),
                "frequency_penalty" => value
                    .as_f64()
                    .map(|v| options.frequency_penalty = Some(v as f32)),
                "stop" => match value {
                    serde_json::Value::String(s) => {
                        options.stop = vec![s.clone()];
                        Some(())
                    }
                    serde_json::Value::Array(items) => items
                        .iter()
                        .map(|v| v.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                        .map(|stop| options.stop = stop),
                    _ => None,
                },
                _ => {
                    tracing::warn!(option = %key, "Ignoring unknown generation option");
                    continue;
                }
            };

            if applied.is_none() {
                tracing::warn!(
                    option = %key,
                    value = %value,
                    "Ignoring malformed generation option"
                );
            }
        }

        options
    }
}

/// A fully resolved request for one endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
}

/// Token counters reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Structured response from a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated text
    pub content: String,
    /// Model reported by the provider
    pub model: String,
    /// Endpoint that served the request
    pub endpoint: String,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
    /// Time taken in milliseconds
    pub latency_ms: u64,
}

/// Sends one request to one endpoint.
///
/// Implementations perform exactly one network exchange per call; retry,
/// timeout and health bookkeeping live in the router.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, endpoint: &Endpoint, request: &ChatRequest)
        -> Result<ChatResponse, LlmError>;
}
