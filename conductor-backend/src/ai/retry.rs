//! Exponential backoff for outbound LLM calls
//!
//! Every ranking, planning, summarization and synthesis call goes through
//! [`with_backoff`], so all stages share one retry discipline: the delay
//! doubles after each failure and is capped at `max_delay`.

use std::future::Future;
use std::time::Duration;

/// Minimum backoff delay
const MIN_BACKOFF: Duration = Duration::from_millis(500);
/// Maximum backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: MIN_BACKOFF,
            max_delay: MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// No waiting between attempts (tests, latency-critical paths)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` until it succeeds or the policy's attempts are exhausted.
///
/// `op` receives the 1-based attempt number. The last error is returned when
/// every attempt fails.
pub async fn with_backoff<T, E, F, Fut>(label: &str, policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    log::info!("[RETRY] '{}' succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < attempts => {
                let delay = policy.delay_after(attempt);
                log::warn!(
                    "[RETRY] '{}' attempt {}/{} failed ({}): {}, backing off {:?}",
                    label,
                    attempt,
                    attempts,
                    if is_retryable_error(&e.to_string()) { "transient" } else { "non-transient" },
                    e,
                    delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => {
                log::error!("[RETRY] '{}' failed after {} attempts: {}", label, attempts, e);
                return Err(e);
            }
        }
    }
}

/// Check if an error message looks like a transient network/provider failure
pub fn is_retryable_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    // Network/connection errors
    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("dns")
    {
        return true;
    }

    // Gateway errors and rate limiting
    ["429", "too many requests", "rate limit", "502", "bad gateway", "503", "service unavailable", "504"]
        .iter()
        .any(|needle| error_lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
        assert_eq!(policy.delay_after(30), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_with_backoff_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_backoff("test", RetryPolicy::immediate(3), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 { Err(format!("503 on attempt {}", attempt)) } else { Ok(attempt) }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_backoff_returns_last_error() {
        let result: Result<(), String> = with_backoff("test", RetryPolicy::immediate(2), |attempt| async move {
            Err(format!("failure {}", attempt))
        })
        .await;
        assert_eq!(result, Err("failure 2".to_string()));
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error("504 Gateway Timeout"));
        assert!(is_retryable_error("Connection reset by peer"));
        assert!(is_retryable_error("429 Too Many Requests"));
        assert!(!is_retryable_error("invalid JSON"));
        assert!(!is_retryable_error("401 Unauthorized"));
    }
}
