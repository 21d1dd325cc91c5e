//! Bounded retry with exponential backoff and jitter
//!
//! Only transient kinds listed in `retryable_kinds` are retried. Every other
//! failure escalates to a terminal outcome on first occurrence.

use crate::config::RetryConfig;
use crate::error::{Result, SyncError, SyncErrorKind};
use crate::model::{Direction, SyncOutcome};
use crate::unit::UnitResult;
use rand::Rng;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Cap for any single delay
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// ±25% random jitter on each delay
    pub jitter: bool,
    retryable_kinds: HashSet<SyncErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Outcome of a retried sync plus the transient failures it went through
#[derive(Debug, Clone)]
pub struct RetryRun {
    pub outcome: SyncOutcome,
    /// One `transient_failure` outcome per retried attempt, oldest first
    pub history: Vec<SyncOutcome>,
}

impl RetryPolicy {
    /// Create from configuration values
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            retryable_kinds: config.retryable_kinds.iter().copied().collect(),
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable_kinds(mut self, kinds: impl IntoIterator<Item = SyncErrorKind>) -> Self {
        self.retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Terminal kinds are never retried, whatever the configured set says
    pub fn is_retryable(&self, err: &SyncError) -> bool {
        let kind = err.kind();
        kind.is_transient() && self.retryable_kinds.contains(&kind)
    }

    /// Delay to wait after `failed_attempt` (1-based) before the next one
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        // Exponential backoff capped at max_delay
        let mut delay = if scaled.is_finite() && scaled < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max_delay
        };

        // Add jitter (±25% of delay)
        if self.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }

    /// Run `op` until it succeeds, fails terminally or attempts run out
    ///
    /// `op` receives the 1-based attempt number. `on_transient` is called for
    /// every failed attempt that will be retried. Returns the number of
    /// attempts made with the final result.
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        mut op: F,
        mut on_transient: impl FnMut(u32, &SyncError),
    ) -> (u32, Result<T>)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return (attempt, Ok(value)),
                Err(err) if self.is_retryable(&err) && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{}: attempt {}/{} failed: {}, retrying in {:?}",
                        label, attempt, self.max_attempts, err, delay
                    );
                    on_transient(attempt, &err);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(err) => {
                    debug!("{}: giving up at attempt {}: {}", label, attempt, err);
                    return (attempt, Err(err));
                },
            }
        }
    }

    /// Run one sync unit under this policy and build its final outcome
    pub async fn run<F, Fut>(&self, key: &str, direction: Direction, op: F) -> RetryRun
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<UnitResult>>,
    {
        let label = format!("{} {}", direction, key);
        let mut history = Vec::new();
        let (attempts, result) = self
            .execute(&label, op, |attempt, err| {
                history.push(SyncOutcome::transient_failure(key, direction, attempt, err));
            })
            .await;

        let outcome = match result {
            Ok(UnitResult::Changed) => SyncOutcome::success(key, direction, attempts),
            Ok(UnitResult::Unchanged) => SyncOutcome::no_change(key, direction, attempts),
            Err(err) => {
                let detail = if err.is_transient() {
                    format!("gave up after {} attempts: {}", attempts, err.detail())
                } else {
                    err.detail().to_string()
                };
                SyncOutcome::terminal_failure(key, direction, attempts, err.kind(), detail)
            },
        };

        RetryRun { outcome, history }
    }
}
