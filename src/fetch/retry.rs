//! Retry logic with exponential backoff for transient request failures.
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - Temporary failures that may succeed on retry
//! - [`FailureType::Permanent`] - Failures that won't succeed regardless of retries
//! - [`FailureType::RateLimited`] - Server rate limiting (retries with backoff)
//!
//! The [`RetryPolicy`] then decides whether to retry based on the attempt
//! count, calculating exponential backoff delays with jitter.
//!
//! # Example
//!
//! ```
//! use newswire::fetch::{AttemptError, FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let error = AttemptError::http_status("https://example.com/news", 503);
//! assert_eq!(policy.classify(&error), FailureType::Transient);
//!
//! match policy.should_retry(policy.classify(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::AttemptError;
use super::constants::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_RETRY_STATUSES,
};

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Classification of attempt failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, retry-listed 5xx, connection refused.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 400 Bad Request, invalid URL.
    Permanent,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

impl FailureType {
    /// Returns true for failures worth another attempt.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 3 (including the first)
/// - `base_delay`: 500 ms
/// - `max_delay`: 30 seconds
/// - `backoff_multiplier`: 2.0
/// - `retry_statuses`: 429, 500, 502, 503, 504
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// jitter = uniform in [0, base_delay]
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry; also the jitter bound.
    base_delay: Duration,

    /// Maximum delay cap, before jitter.
    max_delay: Duration,

    /// Multiplier applied each attempt (typically 2.0 for doubling).
    backoff_multiplier: f32,

    /// HTTP statuses eligible for retry.
    retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings and the default
    /// retry status list.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum attempts including initial (must be >= 1)
    /// * `base_delay` - Base delay for first retry
    /// * `max_delay` - Maximum delay cap
    /// * `backoff_multiplier` - Multiplier for exponential increase
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Replaces the list of retry-eligible HTTP statuses.
    #[must_use]
    pub fn with_retry_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.retry_statuses = statuses;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the retry-eligible HTTP statuses.
    #[must_use]
    pub fn retry_statuses(&self) -> &[u16] {
        &self.retry_statuses
    }

    /// Classifies an attempt error against this policy's retry statuses.
    ///
    /// | Error | Type |
    /// |-------|------|
    /// | HTTP 429 (when listed) | `RateLimited` |
    /// | Other listed statuses | `Transient` |
    /// | Unlisted statuses | `Permanent` |
    /// | Timeout | `Transient` |
    /// | Network (TLS) | `Permanent` |
    /// | Network (other) | `Transient` |
    /// | Invalid URL | `Permanent` |
    #[must_use]
    pub fn classify(&self, error: &AttemptError) -> FailureType {
        match error {
            AttemptError::HttpStatus { status, .. } => {
                if !self.retry_statuses.contains(status) {
                    FailureType::Permanent
                } else if *status == 429 {
                    FailureType::RateLimited
                } else {
                    FailureType::Transient
                }
            }
            AttemptError::Timeout { .. } => FailureType::Transient,
            AttemptError::Network { source, .. } => {
                if is_tls_error(source) {
                    FailureType::Permanent
                } else {
                    FailureType::Transient
                }
            }
            AttemptError::InvalidUrl { .. } => FailureType::Permanent,
        }
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// `attempt` is the attempt number that just failed (1-indexed).
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if !failure_type.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Formula: `min(base_delay * multiplier^(attempt-1), max_delay) + jitter`
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 = multiplier^0 = 1x base
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);

        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    /// Random jitter between 0 and the base delay.
    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let bound = self.base_delay.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=bound))
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!((policy.backoff_multiplier - 2.0).abs() < f32::EPSILON);
        assert_eq!(policy.retry_statuses(), &[429, 500, 502, 503, 504]);
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::with_max_attempts(0);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_retry_policy_custom_statuses() {
        let policy = RetryPolicy::default().with_retry_statuses(vec![503]);
        assert_eq!(
            policy.classify(&AttemptError::http_status("http://e.com", 500)),
            FailureType::Permanent
        );
        assert_eq!(
            policy.classify(&AttemptError::http_status("http://e.com", 503)),
            FailureType::Transient
        );
    }

    // ==================== Delay Calculation Tests ====================

    #[test]
    fn test_delay_calculation_first_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(32), 2.0);
        // base * 2^0 = 1s, plus up to 1s jitter
        let delay = policy.calculate_delay(1);
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_secs(2));
    }

    #[test]
    fn test_delay_calculation_third_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(32), 2.0);
        let delay = policy.calculate_delay(3);
        assert!(delay >= Duration::from_secs(4));
        assert!(delay <= Duration::from_secs(5));
    }

    #[test]
    fn test_delay_calculation_respects_max_delay() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 2.0);
        // 1 * 2^5 = 32s, capped at 5s
        let delay = policy.calculate_delay(6);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_secs(6));
    }

    #[test]
    fn test_zero_base_delay_has_no_jitter() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO, 2.0);
        assert_eq!(policy.calculate_delay(2), Duration::ZERO);
    }

    // ==================== Jitter Tests ====================

    #[test]
    fn test_jitter_bounded_by_base_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(200), Duration::from_secs(1), 2.0);
        for _ in 0..100 {
            let jitter = policy.calculate_jitter();
            assert!(jitter <= Duration::from_millis(200), "jitter {jitter:?} exceeds base");
        }
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_classify_404_permanent() {
        let policy = RetryPolicy::default();
        let error = AttemptError::http_status("http://example.com", 404);
        assert_eq!(policy.classify(&error), FailureType::Permanent);
    }

    #[test]
    fn test_classify_429_rate_limited() {
        let policy = RetryPolicy::default();
        let error = AttemptError::http_status("http://example.com", 429);
        assert_eq!(policy.classify(&error), FailureType::RateLimited);
    }

    #[test]
    fn test_classify_listed_5xx_transient() {
        let policy = RetryPolicy::default();
        for status in [500, 502, 503, 504] {
            let error = AttemptError::http_status("http://example.com", status);
            assert_eq!(policy.classify(&error), FailureType::Transient, "status {status}");
        }
    }

    #[test]
    fn test_classify_unlisted_501_permanent() {
        let policy = RetryPolicy::default();
        let error = AttemptError::http_status("http://example.com", 501);
        assert_eq!(policy.classify(&error), FailureType::Permanent);
    }

    #[test]
    fn test_classify_timeout_transient() {
        let policy = RetryPolicy::default();
        let error = AttemptError::timeout("http://example.com");
        assert_eq!(policy.classify(&error), FailureType::Transient);
    }

    #[test]
    fn test_classify_invalid_url_permanent() {
        let policy = RetryPolicy::default();
        let error = AttemptError::invalid_url("not-a-url");
        assert_eq!(policy.classify(&error), FailureType::Permanent);
    }

    // ==================== Should Retry Decision Tests ====================

    #[test]
    fn test_should_retry_permanent_does_not_retry() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Permanent, 1);
        let RetryDecision::DoNotRetry { reason } = decision else {
            panic!("expected DoNotRetry");
        };
        assert!(reason.contains("permanent"));
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::with_max_attempts(3);

        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::RateLimited, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));

        let RetryDecision::DoNotRetry { reason } = policy.should_retry(FailureType::Transient, 3)
        else {
            panic!("expected DoNotRetry at max attempts");
        };
        assert!(reason.contains("exhausted"));
    }
}
