pub mod client;
pub mod rate_limiter;
pub mod retry;
mod streaming;
pub mod types;

pub use client::AnthropicClient;
pub use rate_limiter::TokenBucketRateLimiter;
pub use retry::RetryPolicy;
