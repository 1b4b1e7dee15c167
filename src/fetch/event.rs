//! Structured per-attempt fetch events.
//!
//! Every outcome of [`ResilientClient::request`](super::ResilientClient::request)
//! (each attempt, plus fail-fast rejections) is emitted as a [`FetchEvent`]:
//! once as a `tracing` event on the `newswire::fetch` target and once to the
//! optional [`FetchObserver`] for external monitoring collaborators.

use serde::Serialize;
use tracing::{debug, warn};

/// Tracing target for fetch events.
pub const FETCH_EVENT_TARGET: &str = "newswire::fetch";

/// What happened to one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// 2xx response.
    Success {
        /// Response status.
        status: u16,
    },
    /// Non-2xx response.
    HttpError {
        /// Response status.
        status: u16,
    },
    /// Attempt timed out.
    Timeout,
    /// Connection-level failure.
    NetworkError,
    /// Rejected by an open circuit; nothing was sent.
    CircuitOpen,
    /// Rejected by the rate limiter; nothing was sent.
    RateLimited,
}

impl FetchOutcome {
    /// Returns true for 2xx outcomes.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// One observed fetch outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchEvent {
    /// Source the request was made for.
    pub source: String,
    /// Circuit key (`source:path-template`).
    pub endpoint: String,
    /// HTTP method.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Attempt number (1-indexed).
    pub attempt: u32,
    /// Time spent on the attempt, zero for fail-fast rejections.
    pub latency_ms: u64,
    /// Outcome classification.
    pub outcome: FetchOutcome,
}

impl FetchEvent {
    /// Emits this event on the fetch tracing target.
    pub fn log(&self) {
        if self.outcome.is_success() {
            debug!(
                target: FETCH_EVENT_TARGET,
                source = %self.source,
                endpoint = %self.endpoint,
                method = %self.method,
                url = %self.url,
                attempt = self.attempt,
                latency_ms = self.latency_ms,
                outcome = ?self.outcome,
                "fetch"
            );
        } else {
            warn!(
                target: FETCH_EVENT_TARGET,
                source = %self.source,
                endpoint = %self.endpoint,
                method = %self.method,
                url = %self.url,
                attempt = self.attempt,
                latency_ms = self.latency_ms,
                outcome = ?self.outcome,
                "fetch"
            );
        }
    }
}

/// Receives every [`FetchEvent`] (metrics, health dashboards, tests).
pub trait FetchObserver: Send + Sync {
    /// Called synchronously after each outcome; keep it cheap.
    fn on_event(&self, event: &FetchEvent);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_event_serializes_outcome_tag() {
        let event = FetchEvent {
            source: "wire".to_string(),
            endpoint: "wire:/news".to_string(),
            method: "GET".to_string(),
            url: "https://example.com/news".to_string(),
            attempt: 2,
            latency_ms: 12,
            outcome: FetchOutcome::HttpError { status: 503 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["outcome"]["kind"], "http_error");
        assert_eq!(json["outcome"]["status"], 503);
        assert_eq!(json["attempt"], 2);
    }

    #[test]
    fn test_outcome_success_flag() {
        assert!(FetchOutcome::Success { status: 200 }.is_success());
        assert!(!FetchOutcome::Timeout.is_success());
    }
}
