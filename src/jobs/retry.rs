/*!
 * Retry policy for failed translation operations.
 *
 * Exponential backoff with a ceiling, plus the closed set of error kinds
 * that are never worth retrying.
 */

use std::time::Duration;

use super::classifier::{ClassifiedError, ErrorKind};

/// Backoff policy and retry budget
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Same delays, different budget
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self.clone()
        }
    }

    /// Whether a failed attempt should be retried.
    ///
    /// `attempt` counts the retries already performed for this job, so the
    /// first failure is checked with `attempt == 0`.
    pub fn should_retry(&self, error: &ClassifiedError, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        Self::is_retryable(error)
    }

    /// Whether an error kind can ever be retried
    pub fn is_retryable(error: &ClassifiedError) -> bool {
        match error.kind {
            ErrorKind::ValidationError | ErrorKind::FileError | ErrorKind::Cancelled => false,
            ErrorKind::ApiError => !error.is_authorization_failure(),
            ErrorKind::Timeout | ErrorKind::Network | ErrorKind::SystemError => true,
        }
    }

    /// `min(base * 2^attempt, max_delay)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
