//! Domain errors for the Crucible refinement system.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by a completion provider.
///
/// The taxonomy drives retry behavior: `Transient` and `RateLimited` are
/// retried with exponential backoff inside the provider adapter,
/// `MalformedOutput` is retried against a fresh completion (never a reparse
/// of the same text), and `Terminal` propagates immediately.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network failure, timeout, or 5xx response. Retried with backoff.
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Rate limit response (HTTP 429). Retried with backoff, kept distinct
    /// from generic transient errors so callers can count it separately.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The provider returned text that failed to parse as the expected
    /// structured format after all fresh-completion retries.
    #[error("Malformed structured output: {0}")]
    MalformedOutput(String),

    /// Auth failure or invalid request. Never retried.
    #[error("Terminal provider error: {0}")]
    Terminal(String),
}

impl ProviderError {
    /// Whether the provider adapter should retry this error with backoff.
    ///
    /// `MalformedOutput` is not retryable here: it has its own
    /// fresh-completion retry path in `complete_json`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited)
    }

    /// Map an HTTP status code plus response body to an error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 | 404 => Self::Terminal(format!("HTTP {status}: {body}")),
            401 | 403 => Self::Terminal(format!("authentication failed (HTTP {status}): {body}")),
            429 => Self::RateLimited,
            500..=599 => Self::Transient(format!("HTTP {status}: {body}")),
            _ => Self::Transient(format!("unexpected HTTP {status}: {body}")),
        }
    }
}

/// Errors from the job lifecycle manager and job store.
#[derive(Debug, Error)]
pub enum JobError {
    /// No record for the given id. Callers must distinguish this from
    /// "still pending": a pending job has a record and reports its status.
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type JobResult<T> = Result<T, JobError>;

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::Serialization(err.to_string())
    }
}
