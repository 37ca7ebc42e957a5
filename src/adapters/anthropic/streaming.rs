//! Server-sent-event accumulation for streaming completions.

use futures::StreamExt;
use tracing::warn;

use crate::adapters::anthropic::client::{map_transport_error, AnthropicClient};
use crate::adapters::anthropic::types::StreamEvent;
use crate::domain::errors::ProviderError;
use crate::domain::ports::provider::{Completion, CompletionRequest, TokenUsage};

/// Run one streaming completion, folding deltas into a buffered result.
pub(super) async fn complete(
    client: &AnthropicClient,
    request: &CompletionRequest,
) -> Result<Completion, ProviderError> {
    client.limiter.acquire().await;

    let response = client
        .post(&AnthropicClient::body(request, true))
        .send()
        .await
        .map_err(map_transport_error)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(status.as_u16(), body));
    }

    let mut text = String::new();
    let mut usage = TokenUsage::default();
    let mut buffer = String::new();

    let mut bytes = response.bytes_stream();
    while let Some(chunk) = bytes.next().await {
        let chunk = chunk.map_err(map_transport_error)?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        // Events are separated by a blank line; anything after the last
        // separator may be a partial event and stays buffered.
        while let Some(boundary) = buffer.find("\n\n") {
            let event: String = buffer.drain(..boundary + 2).collect();
            apply_event(&event, &mut text, &mut usage)?;
        }
    }
    if !buffer.trim().is_empty() {
        apply_event(&buffer, &mut text, &mut usage)?;
    }

    Ok(Completion { text, usage })
}

fn apply_event(
    raw: &str,
    text: &mut String,
    usage: &mut TokenUsage,
) -> Result<(), ProviderError> {
    for line in raw.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        match serde_json::from_str::<StreamEvent>(data) {
            Ok(StreamEvent::MessageStart { message }) => {
                usage.input_tokens += message.usage.input_tokens;
            }
            Ok(StreamEvent::ContentBlockDelta { delta }) => text.push_str(&delta.text),
            Ok(StreamEvent::MessageDelta { usage: delta }) => {
                usage.output_tokens += delta.output_tokens;
            }
            Ok(StreamEvent::Error { error }) => {
                return Err(ProviderError::Transient(format!(
                    "stream error: {}",
                    error.message
                )));
            }
            Ok(StreamEvent::Other) => {}
            Err(err) => warn!(error = %err, "skipping unparseable stream event"),
        }
    }
    Ok(())
}
