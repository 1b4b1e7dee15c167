//! Shared adapter services: authentication and record transformation.
//!
//! Both endpoints are ordinary network calls made through the
//! [`ResilientClient`], so they share the calling source's rate bucket and
//! get their own circuit (`{source}:{path}`).
//!
//! Wire format:
//! - auth: `POST {"source": name}` -> `{"token": "...", "expires_in": n?}`
//! - transform: `POST {"source": name, "records": [...]}` with the bearer
//!   credential -> `{"records": [...]}`

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use super::SourceError;
use crate::cache::CacheStore;
use crate::fetch::{RequestOptions, ResilientClient};

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TransformResponse {
    records: Vec<Value>,
}

/// Client for the auth and transform adapter services.
#[derive(Debug, Clone)]
pub struct AdapterClient {
    client: ResilientClient,
    cache: Arc<CacheStore>,
    token_ttl: Duration,
}

impl AdapterClient {
    /// Creates an adapter client. `token_ttl` applies when the auth response
    /// does not report `expires_in`.
    #[must_use]
    pub fn new(client: ResilientClient, cache: Arc<CacheStore>, token_ttl: Duration) -> Self {
        Self {
            client,
            cache,
            token_ttl,
        }
    }

    /// Returns a bearer credential for `source`, from cache when possible.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Fetch`] when the auth call fails and
    /// [`SourceError::Schema`] when its response has no `token`.
    #[instrument(skip(self, auth_endpoint))]
    pub async fn token(&self, source: &str, auth_endpoint: &str) -> Result<String, SourceError> {
        let key = token_key(source);
        match self.cache.get::<String>(&key).await {
            Ok(Some(token)) => {
                debug!("using cached adapter token");
                return Ok(token);
            }
            Ok(None) => {}
            Err(error) => warn!(error = %error, "discarding undecodable cached token"),
        }

        let options = RequestOptions::for_source(source).json(json!({ "source": source }));
        let response = self.client.post(auth_endpoint, &options).await?;
        let auth: AuthResponse = response
            .json()
            .map_err(|e| SourceError::schema(source, format!("auth response: {e}")))?;
        if auth.token.trim().is_empty() {
            return Err(SourceError::schema(source, "auth response: empty token"));
        }

        match auth.expires_in {
            Some(0) => debug!("adapter token expires immediately, not caching"),
            Some(seconds) => {
                self.cache
                    .set(&key, &auth.token, Duration::from_secs(seconds))
                    .await?;
            }
            None => self.cache.set(&key, &auth.token, self.token_ttl).await?,
        }
        Ok(auth.token)
    }

    /// Sends a raw record batch to the transform service.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Fetch`] when the call fails and
    /// [`SourceError::Schema`] when the response has no `records` array.
    #[instrument(skip(self, transform_endpoint, token, records), fields(batch = records.len()))]
    pub async fn transform(
        &self,
        source: &str,
        transform_endpoint: &str,
        token: Option<&str>,
        records: Vec<Value>,
    ) -> Result<Vec<Value>, SourceError> {
        let mut options = RequestOptions::for_source(source)
            .json(json!({ "source": source, "records": records }));
        if let Some(token) = token {
            options = options.bearer(token);
        }
        let response = self.client.post(transform_endpoint, &options).await?;
        let transformed: TransformResponse = response
            .json()
            .map_err(|e| SourceError::schema(source, format!("transform response: {e}")))?;
        Ok(transformed.records)
    }
}

fn token_key(source: &str) -> String {
    format!("token:{source}")
}
