//! OpenAI-compatible chat-completions transport
//!
//! Works against any endpoint speaking the `/chat/completions` dialect
//! (OpenAI, DeepSeek, Mistral, OpenRouter, local gateways).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::endpoint::Endpoint;
use crate::provider::{ChatMessage, ChatRequest, ChatResponse, LlmError, Transport, Usage};

/// Longest provider error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Largest success body accepted from a provider
const MAX_RESPONSE_BODY: usize = 4 * 1024 * 1024;

/// Request body
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
}

/// Response body
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP transport shared by every OpenAI-compatible endpoint
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxies, custom TLS roots)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &ChatRequest,
    ) -> Result<ChatResponse, LlmError> {
        let credential = endpoint
            .credential
            .as_ref()
            .ok_or_else(|| LlmError::NotConfigured(endpoint.name.clone()))?;

        let start = Instant::now();
        let body = CompletionRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.options.max_tokens,
            temperature: request.options.temperature,
            top_p: request.options.top_p,
            stop: &request.options.stop,
            presence_penalty: request.options.presence_penalty,
            frequency_penalty: request.options.frequency_penalty,
        };

        let response = self
            .client
            .post(endpoint.completions_url())
            .bearer_auth(credential.expose())
            .timeout(endpoint.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            text.truncate(floor_char_boundary(&text, MAX_ERROR_BODY));
            return Err(LlmError::Provider {
                status: Some(status.as_u16()),
                message: text,
            });
        }

        let raw = read_body(response, endpoint, MAX_RESPONSE_BODY).await?;
        let api_response: CompletionResponse =
            serde_json::from_slice(&raw).map_err(|e| LlmError::Provider {
                status: Some(status.as_u16()),
                message: format!("malformed payload: {e}"),
            })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;
        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(ChatResponse {
            content,
            model: api_response.model.unwrap_or_else(|| request.model.clone()),
            endpoint: endpoint.name.clone(),
            usage: api_response.usage,
            finish_reason: choice.finish_reason,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

fn request_error(err: reqwest::Error, endpoint: &Endpoint) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(endpoint.timeout)
    } else {
        LlmError::Transport(err.to_string())
    }
}

/// Read a body chunk by chunk, refusing anything over `limit` bytes
async fn read_body(
    mut response: reqwest::Response,
    endpoint: &Endpoint,
    limit: usize,
) -> Result<Vec<u8>, LlmError> {
    let status = response.status().as_u16();
    let too_large = || LlmError::Provider {
        status: Some(status),
        message: format!("response body exceeds {limit} bytes"),
    };

    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| request_error(e, endpoint))?
    {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Credential;
    use crate::provider::GenerationOptions;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage::user("hi")],
            options: GenerationOptions::default().with_max_tokens(32),
        }
    }

    fn endpoint_for(server: &MockServer) -> Endpoint {
        Endpoint::new("local", format!("{}/v1/", server.uri()))
            .with_credential(Credential::new("sk-test"))
            .with_timeout(Duration::from_secs(5))
    }

    async fn serve(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_success_sends_bearer_and_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 32,
                "top_p": 0.5,
                "messages": [{"role": "user", "content": "hi"}],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-mini-2024",
                "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = request();
        request.options = request.options.with_top_p(0.5);
        let response = HttpTransport::new()
            .send(&endpoint_for(&server), &request)
            .await
            .unwrap();

        assert_eq!(response.content, "hello");
        assert_eq!(response.model, "gpt-4o-mini-2024");
        assert_eq!(response.endpoint, "local");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.unwrap().total_tokens, 4);
    }

    #[tokio::test]
    async fn test_error_status_keeps_code_and_body() {
        let server = serve(ResponseTemplate::new(429).set_body_string("rate limited")).await;

        let err = HttpTransport::new()
            .send(&endpoint_for(&server), &request())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LlmError::Provider {
                status: Some(429),
                message: "rate limited".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_long_error_body_is_truncated() {
        let server = serve(ResponseTemplate::new(500).set_body_string("e".repeat(2000))).await;

        let err = HttpTransport::new()
            .send(&endpoint_for(&server), &request())
            .await
            .unwrap_err();

        match err {
            LlmError::Provider { status, message } => {
                assert_eq!(status, Some(500));
                assert_eq!(message.len(), MAX_ERROR_BODY);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_is_provider_error() {
        let server = serve(ResponseTemplate::new(200).set_body_string("{not json")).await;

        let err = HttpTransport::new()
            .send(&endpoint_for(&server), &request())
            .await
            .unwrap_err();

        match err {
            LlmError::Provider { status, message } => {
                assert_eq!(status, Some(200));
                assert!(message.starts_with("malformed payload"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_choices_or_blank_content_is_empty() {
        for body in [
            serde_json::json!({"choices": []}),
            serde_json::json!({"choices": [{"message": {"content": "  \n"}}]}),
            serde_json::json!({"choices": [{"message": {"content": null}}]}),
        ] {
            let server = serve(ResponseTemplate::new(200).set_body_json(body)).await;

            let err = HttpTransport::new()
                .send(&endpoint_for(&server), &request())
                .await
                .unwrap_err();
            assert_eq!(err, LlmError::EmptyResponse);
        }
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let server = serve(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"choices": [{"message": {"content": "late"}}]}))
                .set_delay(Duration::from_secs(2)),
        )
        .await;
        let endpoint = endpoint_for(&server).with_timeout(Duration::from_millis(100));

        let err = HttpTransport::new()
            .send(&endpoint, &request())
            .await
            .unwrap_err();

        assert_eq!(err, LlmError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let server = serve(
            ResponseTemplate::new(200).set_body_string("x".repeat(MAX_RESPONSE_BODY + 1)),
        )
        .await;

        let err = HttpTransport::new()
            .send(&endpoint_for(&server), &request())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LlmError::Provider { ref message, .. } if message.contains("exceeds")
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let endpoint = Endpoint::new("closed", "http://127.0.0.1:9/v1")
            .with_credential(Credential::new("sk-test"));

        let err = HttpTransport::new()
            .send(&endpoint, &request())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn test_custom_client_is_used() {
        let server = serve(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "via custom client"}}],
        })))
        .await;
        let client = reqwest::Client::builder()
            .user_agent("relay-test")
            .build()
            .unwrap();

        let response = HttpTransport::with_client(client)
            .send(&endpoint_for(&server), &request())
            .await
            .unwrap();

        assert_eq!(response.content, "via custom client");
    }

    #[test]
    fn test_request_body_shape() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let options = GenerationOptions::default().with_max_tokens(64);
        let body = CompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: None,
            stop: &options.stop,
            presence_penalty: None,
            frequency_penalty: None,
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
        assert_eq!(value["max_tokens"], 64);
        assert!(value.get("top_p").is_none());
        assert!(value.get("stop").is_none());
    }

    #[test]
    fn test_response_parsing_tolerates_missing_fields() {
        let raw = r#"{"choices":[{"message":{"content":null}}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert!(parsed.choices[0].message.content.is_none());
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn test_floor_char_boundary() {
        let s = "héllo";
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 100), s.len());
    }

    #[tokio::test]
    async fn test_missing_credential_is_not_configured() {
        let endpoint = Endpoint::new("openai", "http://127.0.0.1:9");
        let request = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage::user("hi")],
            options: GenerationOptions::default(),
        };

        let err = HttpTransport::new().send(&endpoint, &request).await.unwrap_err();
        assert_eq!(err, LlmError::NotConfigured("openai".to_string()));
    }
}
