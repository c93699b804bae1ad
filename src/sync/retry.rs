// file: src/sync/retry.rs
// version: 1.0.0
// guid: 1a7d3c95-e4f2-4b08-9c61-52b8e0f4a3d7

//! Retry of transient store failures

use crate::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How often and how long to wait before retrying a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub initial_delay: Duration,
    /// Upper bound of the delay when backing off
    pub max_delay: Duration,
    /// Double the delay after each failure
    pub exponential: bool,
}

impl RetryPolicy {
    /// Constant delay between attempts
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay: delay,
            max_delay: delay,
            exponential: false,
        }
    }

    /// Delay doubling from `base` up to `max`
    pub fn exponential(attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay: base,
            max_delay: max.max(base),
            exponential: true,
        }
    }

    /// Single attempt
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Resource provisioning calls: 10 attempts, 10 seconds apart
    pub fn provisioning() -> Self {
        Self::fixed(10, Duration::from_secs(10))
    }

    /// Delay before attempt `attempt + 1`, counting from 1
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.initial_delay;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently or attempts run out
    pub async fn run<F, Fut, T>(&self, description: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("Operation succeeded on attempt {}: {}", attempt, description);
                    }
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "Operation failed on attempt {}/{}: {}: {} - retrying in {:?}",
                        attempt, self.attempts, description, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() && self.attempts > 1 {
                        warn!("Operation failed after {} attempts: {}: {}", self.attempts, description, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(2), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageSyncError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy = RetryPolicy::exponential(6, Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
        assert_eq!(policy.delay_after(40), Duration::from_secs(5));
    }

    #[test]
    fn test_provisioning_policy() {
        let policy = RetryPolicy::provisioning();
        assert_eq!(policy.attempts, 10);
        assert_eq!(policy.delay_after(7), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::ZERO);

        let result = policy
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ImageSyncError::api("COS", 503, "SlowDown"))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(5, Duration::ZERO);

        let result: Result<()> = policy
            .run("forbidden", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ImageSyncError::api("VPC", 403, "forbidden"))
            })
            .await;

        assert_eq!(result.unwrap_err().status(), Some(403));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(2, Duration::ZERO);

        let result: Result<()> = policy
            .run("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ImageSyncError::network("connection refused"))
            })
            .await;

        assert!(matches!(result, Err(ImageSyncError::NetworkError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
