//! Retry executor with exponential backoff.
//!
//! Runs one fallible async operation with bounded attempts. Waits between
//! attempts are non-blocking (`tokio::time::sleep`) and hold no lock. The
//! executor never makes business decisions: it classifies the fault through
//! [`Classify`] and either retries it or hands it back unchanged.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use forgepress_core::{Classify, DomainError, DomainResult, FaultKind};

/// Which faults a policy retries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "kinds", rename_all = "snake_case")]
pub enum RetryOn {
    /// Retry whatever the fault itself flags as transient.
    #[default]
    Transient,
    /// Retry only faults whose kind is listed, regardless of their transient flag.
    Kinds(Vec<FaultKind>),
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts including the first one (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Growth factor applied per completed attempt.
    pub backoff_multiplier: f64,
    /// Retryable predicate.
    pub retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            retry_on: RetryOn::Transient,
        }
    }
}

impl RetryPolicy {
    /// Create a policy that runs the operation exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with exponential backoff (multiplier 2).
    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
            retry_on: RetryOn::Transient,
        }
    }

    /// Create a policy with a constant delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            retry_on: RetryOn::Transient,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Retry only the listed fault kinds.
    pub fn retry_only(mut self, kinds: impl IntoIterator<Item = FaultKind>) -> Self {
        self.retry_on = RetryOn::Kinds(kinds.into_iter().collect());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.max_attempts == 0 {
            return Err(DomainError::validation("max_attempts must be at least 1"));
        }
        if self.max_delay < self.initial_delay {
            return Err(DomainError::validation(
                "max_delay must be greater than or equal to initial_delay",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(DomainError::validation("backoff_multiplier must be at least 1"));
        }
        Ok(())
    }

    /// Delay before the retry that follows completed attempt `attempt` (0-based).
    ///
    /// `min(initial_delay * multiplier^attempt, max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let cap = self.max_delay.as_nanos() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay.as_nanos() as f64 * self.backoff_multiplier.max(1.0).powi(exponent);

        if !raw.is_finite() || raw >= cap {
            return self.max_delay;
        }
        Duration::from_nanos(raw.round() as u64)
    }

    /// Whether `err` may be retried under this policy.
    pub fn is_retryable<E: Classify + ?Sized>(&self, err: &E) -> bool {
        match &self.retry_on {
            RetryOn::Transient => err.is_transient(),
            RetryOn::Kinds(kinds) => kinds.contains(&err.fault_kind()),
        }
    }

    /// Whether another attempt is allowed after `completed` attempts.
    pub fn should_retry(&self, completed: u32) -> bool {
        completed < self.max_attempts.max(1)
    }
}

/// Run `operation` until it succeeds, fails non-retryably, or attempts run out.
///
/// On failure the last fault is returned unchanged. `label` only appears in logs.
pub async fn execute_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + core::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = label, retries = attempt, "operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(err) => {
                if !policy.is_retryable(&err) {
                    debug!(
                        operation = label,
                        attempt = attempt + 1,
                        kind = %err.fault_kind(),
                        error = %err,
                        "non-retryable failure"
                    );
                    return Err(err);
                }

                if !policy.should_retry(attempt + 1) {
                    error!(
                        operation = label,
                        attempts = attempt + 1,
                        kind = %err.fault_kind(),
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = label,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use forgepress_core::Fault;
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            backoff_multiplier: 2.0,
            retry_on: RetryOn::Transient,
        }
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_clamped_to_max_delay() {
        let policy = policy(10);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_millis(300));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(500));
    }

    #[test]
    fn validate_rejects_malformed_policies() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(policy(0).validate().is_err());
        assert!(
            RetryPolicy::exponential(3, Duration::from_secs(5), Duration::from_secs(1))
                .validate()
                .is_err()
        );
        assert!(policy(3).with_multiplier(0.5).validate().is_err());
    }

    #[test]
    fn allow_list_overrides_transient_flag() {
        let policy = policy(3).retry_only([FaultKind::RateLimited, FaultKind::Conflict]);

        assert!(policy.is_retryable(&Fault::permanent(FaultKind::Conflict, "stale")));
        assert!(!policy.is_retryable(&Fault::transient(FaultKind::Network, "reset")));
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_failures_returns_immediately() {
        let calls = AtomicU32::new(0);

        let result: Result<&str, Fault> = execute_with_retry(&policy(5), "flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Fault::new(FaultKind::Timeout, "slow"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanently_failing_operation_runs_max_attempts_with_backoff() {
        let started = Mutex::new(Vec::<Instant>::new());
        let policy = policy(4);

        let result: Result<(), Fault> = execute_with_retry(&policy, "always-down", || {
            started.lock().unwrap().push(Instant::now());
            async { Err(Fault::new(FaultKind::Unavailable, "503")) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, FaultKind::Unavailable);

        let started = started.into_inner().unwrap();
        assert_eq!(started.len(), 4);

        let gaps: Vec<u128> = started
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect();
        let expected: Vec<u128> = (0..3).map(|n| policy.delay_for_attempt(n).as_millis()).collect();
        assert_eq!(gaps, expected);
        assert_eq!(expected, vec![100, 200, 300]);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fault_is_invoked_once() {
        let calls = AtomicU32::new(0);

        let result: Result<(), Fault> = execute_with_retry(&policy(5), "denied", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Fault::new(FaultKind::PermissionDenied, "403")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_never_retries() {
        let calls = AtomicU32::new(0);

        let result: Result<(), Fault> = execute_with_retry(&RetryPolicy::no_retry(), "once", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Fault::new(FaultKind::Network, "reset")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
