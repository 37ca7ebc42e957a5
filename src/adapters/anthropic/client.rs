//! HTTP client for the Anthropic Messages API.

use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::anthropic::rate_limiter::TokenBucketRateLimiter;
use crate::adapters::anthropic::retry::RetryPolicy;
use crate::adapters::anthropic::streaming;
use crate::adapters::anthropic::types::{Message, MessagesRequest, MessagesResponse, API_VERSION, MESSAGES_PATH};
use crate::domain::errors::ProviderError;
use crate::domain::models::config::Config;
use crate::domain::ports::provider::{Completion, CompletionProvider, CompletionRequest, TokenUsage};

pub struct AnthropicClient {
    pub(super) http: reqwest::Client,
    pub(super) base_url: String,
    pub(super) api_key: String,
    pub(super) limiter: TokenBucketRateLimiter,
    retry: RetryPolicy,
}

impl AnthropicClient {
    /// Build a client from configuration, reading the API key from the
    /// `ANTHROPIC_API_KEY` environment variable.
    pub fn new(config: &Config) -> Result<Self, ProviderError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ProviderError::Terminal("ANTHROPIC_API_KEY is not set".into()))?;
        Self::with_base_url(config, config.provider.base_url.clone(), api_key)
    }

    /// Build a client against an explicit base URL. Used by tests to point
    /// at a local server.
    pub fn with_base_url(
        config: &Config,
        base_url: String,
        api_key: String,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Terminal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            limiter: TokenBucketRateLimiter::new(config.provider.rate_limit_rps),
            retry: RetryPolicy::new(&config.retry),
        })
    }

    pub(super) fn body(request: &CompletionRequest, stream: bool) -> MessagesRequest {
        MessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system.clone(),
            messages: vec![Message::user(request.prompt.clone())],
            stream: stream.then_some(true),
        }
    }

    pub(super) fn post(&self, body: &MessagesRequest) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{MESSAGES_PATH}", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
    }

    async fn send(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.limiter.acquire().await;

        let response = self
            .post(&Self::body(request, false))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("failed to decode response: {e}")))?;
        Ok(Completion {
            text: parsed.text(),
            usage: TokenUsage::new(parsed.usage.input_tokens, parsed.usage.output_tokens),
        })
    }
}

pub(super) fn map_transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Transient(format!("transport error: {err}"))
}

#[async_trait]
impl CompletionProvider for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        self.retry.run(|| self.send(&request)).await
    }

    /// Streams when the stream cooperates; any stream failure that survives
    /// the retry policy falls back to one buffered completion before the
    /// error is surfaced.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        match self.retry.run(|| streaming::complete(self, &request)).await {
            Ok(completion) => Ok(completion),
            Err(err) => {
                tracing::warn!(error = %err, "stream failed, falling back to buffered completion");
                self.retry.run(|| self.send(&request)).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::RetryConfig;

    fn test_config() -> Config {
        let mut config = Config {
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 4,
            },
            ..Config::default()
        };
        config.provider.rate_limit_rps = 1000.0;
        config
    }

    fn client(server: &mockito::ServerGuard, config: &Config) -> AnthropicClient {
        AnthropicClient::with_base_url(config, server.url(), "test-key".into()).unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "you are a solver".into(),
            prompt: "what is 2 + 2?".into(),
            model: "test-model".into(),
            max_tokens: 128,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn successful_completion_returns_text_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", API_VERSION)
            .with_status(200)
            .with_body(
                r#"{
                    "content": [{"type": "text", "text": "4"}],
                    "usage": {"input_tokens": 9, "output_tokens": 1}
                }"#,
            )
            .expect(1)
            .create_async()
            .await;

        let config = test_config();
        let completion = client(&server, &config).complete(request()).await.unwrap();
        assert_eq!(completion.text, "4");
        assert_eq!(completion.usage.input_tokens, 9);
        assert_eq!(completion.usage.output_tokens, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retried_to_exhaustion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .with_status(500)
            .with_body("overloaded")
            .expect(3)
            .create_async()
            .await;

        let config = test_config();
        let err = client(&server, &config)
            .complete(request())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transient(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .with_status(401)
            .with_body(r#"{"error": {"message": "invalid api key"}}"#)
            .expect(1)
            .create_async()
            .await;

        let config = test_config();
        let err = client(&server, &config)
            .complete(request())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Terminal(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_maps_to_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let mut config = test_config();
        config.retry.max_retries = 0;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(429)
            .create_async()
            .await;

        let err = client(&server, &config)
            .complete(request())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited));
    }

    #[tokio::test]
    async fn streaming_accumulates_deltas_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":7,\"output_tokens\":0}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"4 is\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\" the answer\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":5}}\n\n",
        );
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let config = test_config();
        let completion = client(&server, &config)
            .complete_streaming(request())
            .await
            .unwrap();
        assert_eq!(completion.text, "4 is the answer");
        assert_eq!(completion.usage.input_tokens, 7);
        assert_eq!(completion.usage.output_tokens, 5);
    }

    #[tokio::test]
    async fn stream_failure_falls_back_to_buffered_completion() {
        let mut server = mockito::Server::new_async().await;
        let mut config = test_config();
        config.retry.max_retries = 0;

        // Mockito applies the first matching mock, so the stricter
        // stream matcher is registered first; buffered requests omit the
        // stream flag and fall through to the mock below.
        let stream = server
            .mock("POST", "/v1/messages")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "stream": true
            })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "event: error\n",
                "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"overloaded\"}}\n\n",
            ))
            .expect(1)
            .create_async()
            .await;
        let buffered = server
            .mock("POST", "/v1/messages")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "test-model"
            })))
            .with_status(200)
            .with_body(
                r#"{
                    "content": [{"type": "text", "text": "4"}],
                    "usage": {"input_tokens": 9, "output_tokens": 1}
                }"#,
            )
            .expect(1)
            .create_async()
            .await;

        let completion = client(&server, &config)
            .complete_streaming(request())
            .await
            .unwrap();
        assert_eq!(completion.text, "4");
        assert_eq!(completion.usage.input_tokens, 9);
        stream.assert_async().await;
        buffered.assert_async().await;
    }
}
