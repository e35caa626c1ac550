//! Retry policy for steps and LLM API calls
//!
//! Exponential backoff with deterministic jitter. The policy itself is
//! transport-agnostic: callers classify each attempt as done, worth retrying,
//! or hopeless, and the loop here decides how long to wait between attempts.
//! HTTP-specific concerns (status codes, `Retry-After`) stay with the caller,
//! except for header-value parsing which is shared.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential growth)
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Total number of attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before the retry following `attempt` (0-indexed)
    ///
    /// `base_delay * 2^attempt` capped at `max_delay`, with ±25% jitter.
    /// Jitter is derived from the attempt number so replays are deterministic.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp_delay = self.base_delay_ms.saturating_mul(1u64 << attempt.min(10));
        let capped = exp_delay.min(self.max_delay_ms);

        let jitter_range = capped / 4;
        let jittered = if jitter_range > 0 {
            let offset = (attempt as u64 * 13 + 5) % (jitter_range * 2 + 1);
            capped - jitter_range + offset
        } else {
            capped
        };

        Duration::from_millis(jittered)
    }

    /// Parse a `Retry-After` header value into a delay.
    ///
    /// Accepts integer or decimal seconds; values outside (0, 300] are
    /// rejected.
    pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
        let value = header_value?.trim();
        if let Ok(seconds) = value.parse::<f64>() {
            if seconds > 0.0 && seconds <= 300.0 {
                return Some(Duration::from_secs_f64(seconds));
            }
        }
        None
    }
}

/// Outcome of a single attempt, classified by the caller
#[derive(Debug)]
pub enum Attempt<T> {
    /// The operation succeeded
    Done(T),
    /// Transient failure — retry after the policy's delay (or the given one)
    Again {
        reason: String,
        retry_after: Option<Duration>,
    },
    /// Permanent failure — stop immediately
    Abort(anyhow::Error),
}

/// Run `operation` under the given policy.
///
/// The closure receives the 0-indexed attempt number. Transient failures wait
/// with exponential backoff; permanent failures and exhausted policies return
/// an error carrying the last transient reason.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: F) -> anyhow::Result<T>
where
    F: Fn(u32) -> Fut,
    Fut: std::future::Future<Output = Attempt<T>>,
{
    let mut last_reason = String::new();

    for attempt in 0..policy.max_attempts() {
        match operation(attempt).await {
            Attempt::Done(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "Operation succeeded after retries");
                }
                return Ok(value);
            }
            Attempt::Abort(err) => {
                return Err(err);
            }
            Attempt::Again {
                reason,
                retry_after,
            } => {
                last_reason = reason;

                if attempt + 1 < policy.max_attempts() {
                    let delay = retry_after.unwrap_or_else(|| policy.delay_for_attempt(attempt));
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        reason = %last_reason,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    anyhow::bail!(
        "Operation failed after {} attempts. Last failure: {}",
        policy.max_attempts(),
        last_reason,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_policy_disabled() {
        let policy = RetryPolicy::disabled();
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_delay_exponential_growth() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
        };

        let d0 = policy.delay_for_attempt(0);
        assert!(d0.as_millis() >= 750 && d0.as_millis() <= 1250);

        let d1 = policy.delay_for_attempt(1);
        assert!(d1.as_millis() >= 1500 && d1.as_millis() <= 2500);

        let d2 = policy.delay_for_attempt(2);
        assert!(d2.as_millis() >= 3000 && d2.as_millis() <= 5000);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
        };
        let d = policy.delay_for_attempt(10);
        assert!(d.as_millis() <= 6250); // cap + 25% jitter
    }

    #[test]
    fn test_delay_deterministic() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(2), policy.delay_for_attempt(2));
    }

    #[test]
    fn test_parse_retry_after_integer() {
        let d = RetryPolicy::parse_retry_after(Some("5"));
        assert_eq!(d, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_parse_retry_after_decimal() {
        let d = RetryPolicy::parse_retry_after(Some("1.5"));
        assert_eq!(d, Some(Duration::from_secs_f64(1.5)));
    }

    #[test]
    fn test_parse_retry_after_rejects_garbage() {
        assert_eq!(RetryPolicy::parse_retry_after(None), None);
        assert_eq!(RetryPolicy::parse_retry_after(Some("soon")), None);
        assert_eq!(RetryPolicy::parse_retry_after(Some("-1")), None);
        assert_eq!(RetryPolicy::parse_retry_after(Some("0")), None);
        assert_eq!(RetryPolicy::parse_retry_after(Some("301")), None);
    }

    #[tokio::test]
    async fn test_with_retry_first_attempt() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = with_retry(&policy, |_attempt| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Attempt::Done("ok")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 5,
            max_delay_ms: 20,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = with_retry(&policy, |attempt| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Attempt::Again {
                        reason: "flaky".to_string(),
                        retry_after: None,
                    }
                } else {
                    Attempt::Done("recovered")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_exhaustion() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 5,
            max_delay_ms: 20,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: anyhow::Result<&str> = with_retry(&policy, |_attempt| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Attempt::Again {
                    reason: "still down".to_string(),
                    retry_after: None,
                }
            }
        })
        .await;

        let err = result.unwrap_err().to_string();
        assert!(err.contains("3 attempts"));
        assert!(err.contains("still down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_abort_is_immediate() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: anyhow::Result<&str> = with_retry(&policy, |_attempt| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Attempt::Abort(anyhow::anyhow!("bad credentials"))
            }
        })
        .await;

        assert!(result.unwrap_err().to_string().contains("bad credentials"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_honors_retry_after() {
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay_ms: 5,
            max_delay_ms: 20,
        };

        let start = tokio::time::Instant::now();
        let result = with_retry(&policy, |attempt| async move {
            if attempt == 0 {
                Attempt::Again {
                    reason: "rate limited".to_string(),
                    retry_after: Some(Duration::from_millis(80)),
                }
            } else {
                Attempt::Done(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(70));
    }
}
