//! Retry with exponential backoff for transient WHOIS and push failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{Result, WatchError};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the initial one included.
    pub max_attempts: usize,
    pub initial_delay: Duration,
    /// Cap on the exponential growth.
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.0).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        // powi overflow guard
        let exponent = attempt.min(20) as i32;

        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.0)
        } else {
            capped
        };

        Duration::from_millis(delay as u64)
    }
}

/// Decides whether a failed operation is worth another attempt.
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, error: &WatchError) -> bool;
}

/// Retries timeouts, connection failures and server-side HTTP errors.
/// Input, configuration and template errors are permanent.
#[derive(Debug, Clone, Default)]
pub struct NetworkRetryClassifier;

impl NetworkRetryClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl RetryClassifier for NetworkRetryClassifier {
    fn is_retryable(&self, error: &WatchError) -> bool {
        match error {
            WatchError::Timeout(_) | WatchError::WhoisConnectionFailed(_) => true,
            WatchError::HttpError(e) => is_transient_reqwest_error(e),
            WatchError::WhoisError(msg) | WatchError::PushRejected(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("connect")
                    || lower.contains("timeout")
                    || lower.contains("refused")
                    || lower.contains("reset")
                    || lower.contains("status 5")
            }
            _ => false,
        }
    }
}

fn is_transient_reqwest_error(error: &reqwest::Error) -> bool {
    if error.is_connect() || error.is_timeout() {
        return true;
    }

    if let Some(status) = error.status() {
        return status.as_u16() == 429 || status.is_server_error();
    }

    !(error.is_request() || error.is_body())
}

/// Runs async operations under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor<C: RetryClassifier> {
    policy: RetryPolicy,
    classifier: C,
}

impl RetryExecutor<NetworkRetryClassifier> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: NetworkRetryClassifier::new(),
        }
    }
}

impl<C: RetryClassifier> RetryExecutor<C> {
    pub fn with_classifier(policy: RetryPolicy, classifier: C) -> Self {
        Self { policy, classifier }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes `operation`, retrying retryable failures.
    ///
    /// A failure after at least one retry is reported as
    /// [`WatchError::RetryExhausted`]; a first-attempt permanent failure is
    /// returned unchanged.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let remaining = self.policy.max_attempts.saturating_sub(attempt + 1);
            if !self.classifier.is_retryable(&err) || remaining == 0 {
                if attempt == 0 {
                    return Err(err);
                }
                warn!(
                    attempts = attempt + 1,
                    error = %err,
                    "Operation failed after retries"
                );
                return Err(WatchError::RetryExhausted {
                    attempts: attempt + 1,
                    last_error: err.to_string(),
                });
            }

            let delay = self.policy.delay_for_attempt(attempt);
            debug!(
                attempt = attempt + 1,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after transient error"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(attempts: usize) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn test_policy_builder() {
        let policy = RetryPolicy::new()
            .with_max_attempts(0)
            .with_multiplier(0.5)
            .with_jitter(false);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.multiplier, 1.0);
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }

    #[test]
    fn test_delay_growth_and_cap() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(false);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1000), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10));
        for _ in 0..20 {
            let delay = policy.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(200) && delay < Duration::from_millis(400));
        }
    }

    #[test]
    fn test_classifier() {
        let classifier = NetworkRetryClassifier::new();
        assert!(classifier.is_retryable(&WatchError::Timeout("read".to_string())));
        assert!(classifier.is_retryable(&WatchError::WhoisError(
            "Failed to connect to whois.example: refused".to_string()
        )));
        assert!(classifier.is_retryable(&WatchError::PushRejected("status 503".to_string())));
        assert!(!classifier.is_retryable(&WatchError::PushRejected("status 400".to_string())));
        assert!(!classifier.is_retryable(&WatchError::InvalidDomain("x".to_string())));
        assert!(!classifier.is_retryable(&WatchError::WhoisServerNotFound("zz".to_string())));
        assert!(!classifier.is_retryable(&WatchError::Config("bad".to_string())));
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let executor = RetryExecutor::new(fast_policy(3));
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        let result: Result<&str> = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(WatchError::Timeout("slow".to_string()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let executor = RetryExecutor::new(fast_policy(3));
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        let result: Result<()> = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(WatchError::InvalidDomain("bad..name".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(WatchError::InvalidDomain(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    /// Treats every error as permanent.
    struct NeverRetry;

    impl RetryClassifier for NeverRetry {
        fn is_retryable(&self, _error: &WatchError) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let executor = RetryExecutor::with_classifier(fast_policy(3), NeverRetry);
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        let result: Result<()> = executor
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(WatchError::Timeout("slow".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(WatchError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(executor.policy().max_attempts, 3);
    }

    #[tokio::test]
    async fn test_exhausted() {
        let executor = RetryExecutor::new(fast_policy(2));
        let result: Result<()> = executor
            .execute(|| async { Err(WatchError::Timeout("never".to_string())) })
            .await;

        match result {
            Err(WatchError::RetryExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error, "Timeout: never");
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }
}
