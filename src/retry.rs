//! Rate-limited write coordination
//!
//! The backing key-value store accepts roughly one write per key per second.
//! Writes that hit that limit (or a write conflict) are retried with
//! exponential backoff; any other failure ends the write immediately.
//!
//! ## Exponential Backoff
//!
//! - Attempt 1: No delay (immediate)
//! - Attempt 2: 200ms delay
//! - Attempt 3: 400ms delay (2x)
//! - Capped at max_backoff_ms
//!
//! ## Severity
//!
//! A **critical** write (a cache entry or chunk) returns its error once the
//! attempts are exhausted. A **non-critical** write (a background refresh or a
//! version counter bump) logs the failure and carries on.
//!
//! ## Configuration Example
//!
//! ```yaml
//! cache:
//!   write_retry:
//!     max_attempts: 3
//!     initial_backoff_ms: 200
//!     max_backoff_ms: 2000
//! ```

use std::future::Future;
use std::time::Duration;

use crate::constants::{DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF_MS};
use crate::metrics::EdgeMetrics;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial attempt)
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds (cap for exponential growth)
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// Calculate backoff delay for a given attempt number (0-indexed)
    ///
    /// # Arguments
    /// * `attempt` - The attempt number (0 = first attempt, 1 = first retry, etc.)
    ///
    /// # Returns
    /// Duration to wait before that attempt (0 for first attempt)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        // Exponential backoff: initial_backoff * 2^(attempt-1)
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt - 1))
            .min(self.max_backoff_ms);

        Duration::from_millis(backoff_ms)
    }

    /// Whether another attempt is allowed after `attempt` (0-indexed) failed
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts.max(1)
    }
}

/// Errors that can tell whether a write is worth retrying
pub trait RetryableError: std::fmt::Display {
    /// Rate limit or write conflict; the same write may succeed later
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSeverity {
    /// Failure is returned to the caller
    Critical,
    /// Failure is logged and swallowed
    NonCritical,
}

impl WriteSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteSeverity::Critical => "critical",
            WriteSeverity::NonCritical => "non_critical",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteCoordinator {
    policy: RetryPolicy,
}

impl WriteCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run a write, retrying rate-limit and conflict failures with backoff
    ///
    /// Returns `Ok(Some(value))` on success. After the attempts are exhausted,
    /// or on a non-retryable failure, a critical write returns the error and a
    /// non-critical write returns `Ok(None)`.
    pub async fn write_with_retry<T, E, F, Fut>(
        &self,
        severity: WriteSeverity,
        label: &str,
        mut op: F,
    ) -> Result<Option<T>, E>
    where
        E: RetryableError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            let delay = self.policy.backoff_duration(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let error = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(label = label, attempts = attempt + 1, "Write succeeded after retry");
                    }
                    return Ok(Some(value));
                }
                Err(e) => e,
            };

            if error.is_retryable() && self.policy.has_attempts_left(attempt) {
                EdgeMetrics::global().record_write_retry(severity.as_str());
                tracing::debug!(
                    label = label,
                    attempt = attempt + 1,
                    next_delay_ms = self.policy.backoff_duration(attempt + 1).as_millis() as u64,
                    error = %error,
                    "Write rate limited, retrying"
                );
                attempt += 1;
                continue;
            }

            return match severity {
                WriteSeverity::Critical => {
                    tracing::error!(
                        label = label,
                        attempts = attempt + 1,
                        error = %error,
                        "Critical write failed"
                    );
                    Err(error)
                }
                WriteSeverity::NonCritical => {
                    tracing::warn!(
                        label = label,
                        attempts = attempt + 1,
                        error = %error,
                        "Non-critical write failed, ignoring"
                    );
                    Ok(None)
                }
            };
        }
    }
}
