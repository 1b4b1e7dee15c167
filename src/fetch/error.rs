//! Error types for outbound requests.
//!
//! [`AttemptError`] describes why a single HTTP attempt failed. [`FetchError`]
//! is what [`ResilientClient::request`](super::ResilientClient::request)
//! returns once retries, the circuit breaker and the rate limiter have had
//! their say.

use std::time::Duration;

use thiserror::Error;

use super::rate_limiter::parse_retry_after;

/// Failure of one HTTP attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request did not complete within its timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-2xx response.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The raw Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The URL is malformed or not http(s).
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl AttemptError {
    /// Creates a network error, promoting reqwest timeouts to [`Self::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// HTTP status, when the attempt got a response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-mandated delay parsed from `Retry-After`, capped at one hour.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HttpStatus {
                retry_after: Some(value),
                ..
            } => parse_retry_after(value),
            _ => None,
        }
    }
}

/// Final failure of a resilient request.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No rate-limit token became available within the wait bound.
    #[error("rate limited for source '{source_name}': next token in {}ms exceeds wait bound", .wait.as_millis())]
    RateLimited {
        /// Source whose bucket was empty.
        source_name: String,
        /// Wait that would have been needed.
        wait: Duration,
    },

    /// The endpoint's circuit is open; no network call was made.
    #[error("circuit open for endpoint {endpoint}")]
    CircuitOpen {
        /// Endpoint key (`source:path-template`).
        endpoint: String,
    },

    /// Every allowed attempt failed with a retry-eligible error.
    #[error("retries exhausted after {attempts} attempts for {url}: {last}")]
    ExhaustedRetries {
        /// The requested URL.
        url: String,
        /// Attempts made, including the first.
        attempts: u32,
        /// Error of the final attempt.
        #[source]
        last: AttemptError,
    },

    /// A non-retryable failure (e.g. 404); returned after one attempt.
    #[error("request failed for {url}: {source}")]
    RequestFailed {
        /// The requested URL.
        url: String,
        /// The attempt error.
        #[source]
        source: AttemptError,
    },
}

impl FetchError {
    /// Creates a rate-limited error.
    pub fn rate_limited(source_name: impl Into<String>, wait: Duration) -> Self {
        Self::RateLimited {
            source_name: source_name.into(),
            wait,
        }
    }

    /// Creates a circuit-open error.
    pub fn circuit_open(endpoint: impl Into<String>) -> Self {
        Self::CircuitOpen {
            endpoint: endpoint.into(),
        }
    }

    /// Creates an exhausted-retries error.
    pub fn exhausted(url: impl Into<String>, attempts: u32, last: AttemptError) -> Self {
        Self::ExhaustedRetries {
            url: url.into(),
            attempts,
            last,
        }
    }

    /// Creates a non-retryable failure.
    pub fn request_failed(url: impl Into<String>, source: AttemptError) -> Self {
        Self::RequestFailed {
            url: url.into(),
            source,
        }
    }
}

// No `From<reqwest::Error>`: every variant needs the URL or endpoint for
// context, so the helper constructors are used instead.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_error_http_status_display() {
        let error = AttemptError::http_status("https://example.com/news", 503);
        let msg = error.to_string();
        assert!(msg.contains("503"), "Expected '503' in: {msg}");
        assert!(msg.contains("https://example.com/news"), "Expected URL in: {msg}");
        assert_eq!(error.status(), Some(503));
    }

    #[test]
    fn test_attempt_error_retry_after_parses_seconds() {
        let error =
            AttemptError::http_status_with_retry_after("https://e.com", 429, Some("7".into()));
        assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(AttemptError::timeout("https://e.com").retry_after(), None);
    }

    #[test]
    fn test_fetch_error_exhausted_display() {
        let error = FetchError::exhausted("https://e.com/x", 3, AttemptError::timeout("https://e.com/x"));
        let msg = error.to_string();
        assert!(msg.contains("3 attempts"), "got: {msg}");
        assert!(msg.contains("timeout"), "got: {msg}");
    }

    #[test]
    fn test_fetch_error_rate_limited_display() {
        let error = FetchError::rate_limited("wire", Duration::from_millis(1500));
        let msg = error.to_string();
        assert!(msg.contains("wire"));
        assert!(msg.contains("1500ms"));
    }
}
