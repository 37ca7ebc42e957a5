pub mod job_store;
pub mod provider;

pub use job_store::JobStore;
pub use provider::{Completion, CompletionProvider, CompletionRequest, JsonCompletion, TokenUsage};
