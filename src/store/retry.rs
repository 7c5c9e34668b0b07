use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use super::{ItemSource, StoreError};
use crate::model::{ItemFilter, ItemPatch, ReviewItem, SourceId};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 5_000;
const DEFAULT_JITTER: f64 = 0.1;

/// Exponential backoff policy for transient store failures. Attempts are
/// counted from 1 and include the initial call, so the default of 3 means
/// one call plus two retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the retry that follows a failed `attempt`. Doubles per
    /// attempt up to `max_delay`, with a small random spread so concurrent
    /// callers do not hammer a recovering store in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw_ms = (self.base_delay.as_millis() as u64).saturating_mul(1u64 << exponent);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as u64);
        if self.jitter <= 0.0 {
            return Duration::from_millis(capped_ms);
        }
        let mut rng = rand::rng();
        let factor = rng.random_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_millis((capped_ms as f64 * factor).round() as u64)
    }
}

/// Runs a fallible store call under the policy. Only transient failures are
/// retried; everything else propagates on the first occurrence. When the
/// budget is exhausted the last transient cause is wrapped in
/// [`StoreError::Unavailable`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op: &str,
    mut call: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last = String::new();

    for attempt in 1..=attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient store failure, retrying"
                );
                last = err.to_string();
                sleep(delay).await;
            }
            Err(err) if err.is_transient() => {
                return Err(StoreError::Unavailable {
                    attempts,
                    last: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    Err(StoreError::Unavailable { attempts, last })
}

/// Retry decorator over any [`ItemSource`]. Every capability call goes
/// through [`with_retry`] with the same policy, so individual sources stay
/// free of backoff logic.
pub struct RetryingSource {
    inner: Box<dyn ItemSource>,
    policy: RetryPolicy,
}

impl RetryingSource {
    pub fn new(inner: Box<dyn ItemSource>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ItemSource for RetryingSource {
    fn id(&self) -> &SourceId {
        self.inner.id()
    }

    async fn query_items(&self, filter: ItemFilter) -> Result<Vec<ReviewItem>, StoreError> {
        with_retry(&self.policy, "query_items", || self.inner.query_items(filter)).await
    }

    async fn fetch_item(&self, item_id: &str) -> Result<ReviewItem, StoreError> {
        with_retry(&self.policy, "fetch_item", || self.inner.fetch_item(item_id)).await
    }

    async fn update_item(&self, item_id: &str, patch: ItemPatch) -> Result<(), StoreError> {
        with_retry(&self.policy, "update_item", || {
            self.inner.update_item(item_id, patch)
        })
        .await
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        with_retry(&self.policy, "count_all", || self.inner.count_all()).await
    }

    async fn load_config(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        with_retry(&self.policy, "load_config", || self.inner.load_config(key)).await
    }

    async fn save_config(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        with_retry(&self.policy, "save_config", || {
            self.inner.save_config(key, value.clone())
        })
        .await
    }

    async fn describe(&self) -> Result<String, StoreError> {
        with_retry(&self.policy, "describe", || self.inner.describe()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(350));
    }

    #[test]
    fn test_delay_jitter_stays_bounded() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5_000),
            jitter: 0.1,
        };
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(2).as_millis() as u64;
            assert!((180..=220).contains(&delay), "delay {delay} out of range");
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "query", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Transient("timeout".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_reports_unavailable() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, StoreError> = with_retry(&fast_policy(3), "query", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Transient("timeout".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(StoreError::Unavailable { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("timeout"));
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, StoreError> = with_retry(&fast_policy(3), "fetch", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Permanent("malformed record".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(StoreError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, StoreError> = with_retry(&fast_policy(3), "fetch", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::NotFound("item-9".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
