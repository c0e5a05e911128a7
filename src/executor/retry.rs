//! Error classification and retry policy for chain operations.
//!
//! Transient failures (network hiccups, mempool races, throttling) are
//! retried with exponential back-off; anything else is fatal and bubbles
//! up so the state machine can unwind.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::ExecutionTuning;
use crate::events::{EventBus, ResolverEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Recoverable,
    Fatal,
}

/// Message fragments that mark an error as worth retrying.
const RECOVERABLE_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "temporarily unavailable",
    "insufficient gas",
    "nonce too low",
    "replacement transaction underpriced",
    "underpriced",
    "429",
    "too many requests",
    "500",
    "502",
    "503",
    "504",
];

pub fn classify(error: &anyhow::Error) -> ErrorClass {
    let message = format!("{:#}", error).to_lowercase();
    if RECOVERABLE_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorClass::Recoverable
    } else {
        ErrorClass::Fatal
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn from_tuning(tuning: &ExecutionTuning) -> Self {
        RetryPolicy {
            max_retries: tuning.max_retries,
            base_delay_ms: tuning.retry_delay_ms,
            backoff_factor: tuning.retry_backoff.max(1.0),
        }
    }

    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let ms = self.base_delay_ms as f64 * self.backoff_factor.powi(retry_count as i32);
        Duration::from_millis(ms.min(300_000.0) as u64)
    }
}

/// Run `op`, retrying recoverable failures up to the policy limit. Every
/// retry emits a `RetryAttempt` event; fatal errors return immediately.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    events: &EventBus,
    order_id: &str,
    stage: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if classify(&error) == ErrorClass::Fatal {
                    return Err(error.context(format!("{} failed permanently", stage)));
                }
                if attempt >= policy.max_retries {
                    return Err(error.context(format!(
                        "{} failed after {} retries",
                        stage, policy.max_retries
                    )));
                }
                attempt += 1;
                let delay = policy.delay_for(attempt - 1);
                warn!(
                    order_id,
                    stage,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, retrying"
                );
                events.emit(ResolverEvent::RetryAttempt {
                    order_id: order_id.to_string(),
                    stage: stage.to_string(),
                    attempt,
                });
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn classification_matches_taxonomy() {
        assert_eq!(
            classify(&anyhow!("request timed out after 10s")),
            ErrorClass::Recoverable
        );
        assert_eq!(
            classify(&anyhow!("rpc error: nonce too low")),
            ErrorClass::Recoverable
        );
        assert_eq!(
            classify(&anyhow!("relayer error 503 on /bids")),
            ErrorClass::Recoverable
        );
        assert_eq!(
            classify(&anyhow!("invalid secret: preimage mismatch")),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify(&anyhow!("auction o1 is no longer active")),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn backoff_grows_exponentially() {
        let p = policy();
        assert_eq!(p.delay_for(0), Duration::from_millis(1));
        assert_eq!(p.delay_for(1), Duration::from_millis(2));
        assert_eq!(p.delay_for(2), Duration::from_millis(4));
    }

    #[tokio::test]
    async fn recoverable_errors_retry_until_success() {
        let calls = AtomicU32::new(0);
        let events = EventBus::new();
        let result = with_retry(policy(), &events, "o1", "funding", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow!("connection reset"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let events = EventBus::new();
        let result: Result<()> = with_retry(policy(), &events, "o1", "redeem", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow!("invalid script")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_exhaust_at_limit() {
        let calls = AtomicU32::new(0);
        let events = EventBus::new();
        let result: Result<()> = with_retry(policy(), &events, "o1", "funding", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow!("network unreachable")) }
        })
        .await;
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("after 3 retries"));
        assert_eq!(calls.load(Ordering::SeqCst), 4); // initial + 3 retries
    }
}
