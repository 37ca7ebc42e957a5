//! Scripted completion provider for tests and offline runs.
//!
//! Rules are matched in insertion order against the concatenated system
//! instructions and prompt. Each rule carries a queue of replies; the last
//! reply repeats once the queue is down to one entry, so a short script can
//! serve an arbitrarily long run.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::errors::ProviderError;
use crate::domain::models::DEFAULT_STOP_MARKER;
use crate::domain::ports::provider::{Completion, CompletionProvider, CompletionRequest, TokenUsage};

#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Error(ProviderError),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn error(error: ProviderError) -> Self {
        Self::Error(error)
    }
}

struct Rule {
    needle: String,
    replies: Mutex<VecDeque<MockReply>>,
}

#[derive(Default)]
pub struct MockProvider {
    rules: Vec<Rule>,
    default_text: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule matching any request whose system or prompt contains
    /// `needle`, answering from `replies` in order.
    #[must_use]
    pub fn with_rule(mut self, needle: impl Into<String>, replies: Vec<MockReply>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            replies: Mutex::new(replies.into()),
        });
        self
    }

    /// Fallback text for requests no rule matches.
    #[must_use]
    pub fn with_default(mut self, text: impl Into<String>) -> Self {
        self.default_text = Some(text.into());
        self
    }

    /// A self-contained script for offline demo runs: the evaluator asks for
    /// one revision, then signals convergence.
    pub fn demo() -> Self {
        Self::new()
            .with_rule(
                "strict evaluator",
                vec![
                    MockReply::text("The answer is plausible but gives no reasoning."),
                    MockReply::text(format!(
                        "The answer is complete and correct.\n{DEFAULT_STOP_MARKER}"
                    )),
                ],
            )
            .with_rule(
                "prompt refiner",
                vec![MockReply::text(
                    "Answer the question and explain the reasoning step by step.",
                )],
            )
            .with_rule(
                "coordinator",
                vec![MockReply::text(
                    r#"{"action":"delegate","subordinates":[{"specialization":"analysis expert","subtask":"Work through the question step by step."}]}"#,
                )],
            )
            .with_default("This is a scripted demo answer with step-by-step reasoning.")
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let haystack = format!("{}\n{}", request.system, request.prompt);

        for rule in &self.rules {
            if !haystack.contains(&rule.needle) {
                continue;
            }
            let mut replies = rule
                .replies
                .lock()
                .map_err(|_| ProviderError::Terminal("mock reply queue poisoned".into()))?;
            let reply = if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            };
            return match reply {
                Some(MockReply::Text(text)) => Ok(Completion {
                    text,
                    usage: TokenUsage::new(32, 64),
                }),
                Some(MockReply::Error(error)) => Err(error),
                None => Err(ProviderError::Terminal(format!(
                    "mock rule '{}' has no replies",
                    rule.needle
                ))),
            };
        }

        self.default_text.as_ref().map_or_else(
            || {
                Err(ProviderError::Terminal(
                    "no mock rule matches the request".into(),
                ))
            },
            |text| {
                Ok(Completion {
                    text: text.clone(),
                    usage: TokenUsage::new(32, 64),
                })
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(system: &str, prompt: &str) -> CompletionRequest {
        CompletionRequest {
            system: system.into(),
            prompt: prompt.into(),
            model: "test-model".into(),
            max_tokens: 256,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn replies_pop_in_order_and_last_repeats() {
        let provider = MockProvider::new().with_rule(
            "evaluator",
            vec![MockReply::text("first"), MockReply::text("second")],
        );

        let r = request("evaluator", "x");
        assert_eq!(provider.complete(r.clone()).await.unwrap().text, "first");
        assert_eq!(provider.complete(r.clone()).await.unwrap().text, "second");
        assert_eq!(provider.complete(r).await.unwrap().text, "second");
    }

    #[tokio::test]
    async fn unmatched_request_uses_default_or_errors() {
        let with_default = MockProvider::new().with_default("fallback");
        assert_eq!(
            with_default
                .complete(request("anything", "y"))
                .await
                .unwrap()
                .text,
            "fallback"
        );

        let bare = MockProvider::new();
        assert!(bare.complete(request("anything", "y")).await.is_err());
    }

    #[tokio::test]
    async fn error_replies_surface_as_errors() {
        let provider = MockProvider::new().with_rule(
            "solver",
            vec![
                MockReply::error(ProviderError::Transient("flaky".into())),
                MockReply::text("recovered"),
            ],
        );
        let r = request("solver", "q");
        assert!(provider.complete(r.clone()).await.is_err());
        assert_eq!(provider.complete(r).await.unwrap().text, "recovered");
    }
}
