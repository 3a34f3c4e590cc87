//! Anthropic Messages API client.
//!
//! The agent only depends on the [`ModelClient`] trait, so tests can script
//! replies without a network endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};

use super::config::ModelConfig;
use super::errors::InferenceError;
use super::types::{Message, MessagesRequest, ModelResponse, ToolSchema};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout. Long tool-heavy contexts take a while to process.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Messages API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ─── ModelClient ─────────────────────────────────────────────────────────────

/// Something that can answer a conversation, optionally asking for tools.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn create_message(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ModelResponse, InferenceError>;
}

// ─── AnthropicClient ─────────────────────────────────────────────────────────

/// HTTP client for `POST {base_url}/v1/messages`.
pub struct AnthropicClient {
    http: HttpClient,
    config: ModelConfig,
    api_key: String,
}

impl AnthropicClient {
    /// Build a client, reading the API key from the configured variable.
    pub fn from_config(config: ModelConfig) -> Result<Self, InferenceError> {
        let api_key = config.api_key()?;
        Self::new(config, api_key)
    }

    /// Build a client with an explicit API key.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn new(config: ModelConfig, api_key: String) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.config.name
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn create_message(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ModelResponse, InferenceError> {
        let url = self.endpoint();
        let body = MessagesRequest {
            model: &self.config.name,
            max_tokens: self.config.max_tokens,
            system: self.config.system_prompt.as_deref(),
            messages,
            tools,
        };

        tracing::debug!(
            model = %self.config.name,
            messages = messages.len(),
            tools = tools.len(),
            "sending messages request"
        );

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout {
                        duration_secs: REQUEST_TIMEOUT.as_secs(),
                    }
                } else {
                    InferenceError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "model endpoint returned an error");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::InvalidResponse {
                reason: format!("failed to read response body: {e}"),
            })?;

        let parsed: ModelResponse =
            serde_json::from_str(&body_text).map_err(|e| InferenceError::InvalidResponse {
                reason: format!("{e}"),
            })?;

        if let Some(usage) = parsed.usage {
            tracing::debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                stop_reason = ?parsed.stop_reason,
                "model replied"
            );
        }
        Ok(parsed)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::{ContentBlock, StopReason};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> AnthropicClient {
        let config = ModelConfig {
            name: "test-model".into(),
            base_url: base_url.to_string(),
            ..ModelConfig::default()
        };
        AnthropicClient::new(config, "sk-test".into()).unwrap()
    }

    fn echo_schema() -> ToolSchema {
        ToolSchema {
            name: "demo__echo".into(),
            description: "Echo".into(),
            input_schema: json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn test_create_message_sends_headers_and_parses_tool_use() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "model": "test-model",
                "tools": [{"name": "demo__echo"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "demo__echo", "input": {"text": "hi"}}
                ],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 5, "output_tokens": 7}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = client(&server.uri())
            .create_message(&[Message::user_text("hi")], &[echo_schema()])
            .await
            .unwrap();

        assert_eq!(resp.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(
            resp.content[0],
            ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "demo__echo".into(),
                input: json!({"text": "hi"}),
            }
        );
    }

    #[tokio::test]
    async fn test_http_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .create_message(&[Message::user_text("hi")], &[])
            .await
            .unwrap_err();

        match err {
            InferenceError::HttpError { status, body } => {
                assert_eq!(status, 529);
                assert_eq!(body, "overloaded");
            }
            other => panic!("expected HttpError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_200_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "content": [{"type": "text", "text": "queued"}],
                "stop_reason": "end_turn"
            })))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .create_message(&[Message::user_text("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::HttpError { status: 202, .. }));
    }

    #[tokio::test]
    async fn test_invalid_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .create_message(&[Message::user_text("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let err = client("http://127.0.0.1:9")
            .create_message(&[Message::user_text("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. }
        ));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        assert_eq!(
            client("http://localhost:1234/").endpoint(),
            "http://localhost:1234/v1/messages"
        );
    }
}
