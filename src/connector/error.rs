//! Per-source failures, caught and recorded at the router boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;
use crate::extract::ExtractError;
use crate::fetch::FetchError;

/// Why a source produced no (or only partial) records.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A resilient request gave up.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A cache payload could not be encoded.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A markup page could not be parsed.
    #[error(transparent)]
    Parse(#[from] ExtractError),

    /// An API or adapter response did not have the expected JSON shape.
    #[error("source '{source_name}': unexpected response shape: {reason}")]
    Schema {
        /// Offending source.
        source_name: String,
        /// What was wrong.
        reason: String,
    },
}

impl SourceError {
    pub(crate) fn schema(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Summary category for this failure.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Fetch(FetchError::RateLimited { .. }) => FailureKind::RateLimited,
            Self::Fetch(FetchError::CircuitOpen { .. }) => FailureKind::CircuitOpen,
            Self::Fetch(FetchError::ExhaustedRetries { .. }) => FailureKind::ExhaustedRetries,
            Self::Fetch(FetchError::RequestFailed { .. }) => FailureKind::RequestFailed,
            Self::Parse(_) | Self::Schema { .. } => FailureKind::ParseFailure,
            Self::Cache(_) => FailureKind::Cache,
        }
    }
}

/// Failure category reported in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// No rate-limit token within the wait bound.
    RateLimited,
    /// The endpoint's circuit was open.
    CircuitOpen,
    /// Every attempt failed retryably.
    ExhaustedRetries,
    /// A non-retryable request failure.
    RequestFailed,
    /// The document or response could not be interpreted.
    ParseFailure,
    /// The cache rejected a payload.
    Cache,
    /// The source's task died before reporting (panic or abort).
    Internal,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::fetch::AttemptError;

    #[test]
    fn test_kind_mapping() {
        let cases = [
            (
                SourceError::from(FetchError::rate_limited("a", Duration::from_secs(1))),
                FailureKind::RateLimited,
            ),
            (
                SourceError::from(FetchError::circuit_open("a:/x")),
                FailureKind::CircuitOpen,
            ),
            (
                SourceError::from(FetchError::exhausted(
                    "http://x",
                    3,
                    AttemptError::timeout("http://x"),
                )),
                FailureKind::ExhaustedRetries,
            ),
            (
                SourceError::from(FetchError::request_failed(
                    "http://x",
                    AttemptError::http_status("http://x", 404),
                )),
                FailureKind::RequestFailed,
            ),
            (SourceError::schema("a", "not an array"), FailureKind::ParseFailure),
        ];
        for (error, kind) in cases {
            assert_eq!(error.kind(), kind, "{error}");
        }
    }

    #[test]
    fn test_failure_kind_serializes_by_name() {
        let json = serde_json::to_string(&FailureKind::ExhaustedRetries).unwrap();
        assert_eq!(json, "\"ExhaustedRetries\"");
    }
}
