//! Token-bucket request pacing for the API client.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Smooths outbound requests to a sustained rate with a small burst
/// allowance. Shared across every engine in a job's delegation tree.
pub struct TokenBucketRateLimiter {
    bucket: Mutex<Bucket>,
    rate: f64,
    capacity: f64,
}

impl TokenBucketRateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let rate = requests_per_second.max(0.1);
        let capacity = rate.max(1.0);
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            rate,
            capacity,
        }
    }

    /// Wait until a request slot is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_within_capacity_is_immediate() {
        let limiter = TokenBucketRateLimiter::new(5.0);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn exhausted_bucket_paces_the_next_request() {
        let limiter = TokenBucketRateLimiter::new(20.0);
        for _ in 0..20 {
            limiter.acquire().await;
        }
        let start = Instant::now();
        limiter.acquire().await;
        // One token refills in 50ms at 20 rps.
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
