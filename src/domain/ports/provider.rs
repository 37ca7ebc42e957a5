//! Port for language model completion backends.
//!
//! The engine talks to generation, evaluation, and refinement through this
//! trait so the backing provider (Anthropic API, mock, future backends) can
//! be swapped without touching the convergence loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::ProviderError;

/// How many fresh completions to request when structured output fails to
/// parse before giving up with `MalformedOutput`.
pub const JSON_PARSE_ATTEMPTS: u32 = 3;

/// A single completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System-level instructions establishing the role
    pub system: String,
    /// User-turn prompt
    pub prompt: String,
    /// Model selector
    pub model: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature; evaluation runs at 0.0
    pub temperature: f64,
}

/// Token accounting for a single completion or an aggregate of many.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn add(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A completed text generation.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// A completion parsed into a JSON value, with usage summed across the
/// attempts it took to obtain it.
#[derive(Debug, Clone)]
pub struct JsonCompletion {
    pub value: serde_json::Value,
    pub usage: TokenUsage,
}

/// Abstraction over a completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run a single completion to completion, applying whatever retry and
    /// rate-limiting policy the backend carries.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;

    /// Streaming variant. Backends without a streaming path fall back to the
    /// buffered call.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        self.complete(request).await
    }

    /// Request a completion expected to carry a JSON payload. A reply that
    /// fails to parse is discarded and a fresh completion is requested, up to
    /// [`JSON_PARSE_ATTEMPTS`] times; usage from discarded replies still
    /// counts. Exhaustion surfaces as `MalformedOutput`.
    async fn complete_json(
        &self,
        request: CompletionRequest,
    ) -> Result<JsonCompletion, ProviderError> {
        let mut usage = TokenUsage::default();
        let mut last_error = String::new();

        for attempt in 1..=JSON_PARSE_ATTEMPTS {
            let completion = self.complete(request.clone()).await?;
            usage.add(completion.usage);

            match parse_json_payload(&completion.text) {
                Ok(value) => return Ok(JsonCompletion { value, usage }),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "completion was not valid JSON");
                    last_error = err;
                }
            }
        }

        Err(ProviderError::MalformedOutput(format!(
            "no parseable JSON after {JSON_PARSE_ATTEMPTS} attempts: {last_error}"
        )))
    }
}

/// Extract a JSON value from completion text. Tolerates a fenced code block
/// or prose surrounding a single object by scanning for the outermost braces.
pub fn parse_json_payload(text: &str) -> Result<serde_json::Value, String> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(inner) = strip_code_fence(trimmed) {
        if let Ok(value) = serde_json::from_str(inner) {
            return Ok(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err("text contains no JSON object".to_string())
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    // Fence may carry a language tag on the opening line.
    let body_start = rest.find('\n')?;
    let body = &rest[body_start + 1..];
    let end = body.rfind("```")?;
    Some(body[..end].trim())
}
