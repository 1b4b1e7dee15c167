//! Cache error types.

use thiserror::Error;

/// Errors raised by cache backends and the [`CacheStore`](super::CacheStore).
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not be reached or rejected the command.
    #[error("cache backend {backend} unavailable: {reason}")]
    Unavailable {
        /// Backend name (e.g. "redis").
        backend: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// The value could not be serialized. Caller error.
    #[error("failed to serialize cache value for key {key}: {source}")]
    Serialization {
        /// Cache key.
        key: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The stored payload does not decode as the requested type.
    #[error("failed to deserialize cache value for key {key}: {source}")]
    Deserialization {
        /// Cache key.
        key: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    /// Creates an unavailable-backend error.
    pub fn unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            key: key.into(),
            source,
        }
    }

    /// Creates a deserialization error.
    pub fn deserialization(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Deserialization {
            key: key.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_display() {
        let error = CacheError::unavailable("redis", "connection refused");
        let msg = error.to_string();
        assert!(msg.contains("redis"));
        assert!(msg.contains("connection refused"));
    }
}
