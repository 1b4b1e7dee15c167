//! Resilient HTTP client: retry with backoff, circuit breaking and rate
//! limiting around every outbound call.
//!
//! # Attempt loop
//!
//! For each attempt [`ResilientClient::request`]:
//! 1. takes a token from the source's bucket (bounded wait, else `RateLimited`)
//! 2. asks the endpoint's circuit for admission (else `CircuitOpen`, no network call)
//! 3. sends the request with the per-request timeout
//! 4. reports the outcome to the circuit and emits a [`FetchEvent`]
//! 5. on a retry-eligible failure, sleeps per backoff (or `Retry-After`) and loops
//!
//! Non-retryable failures return `RequestFailed` after one attempt; retryable
//! ones return `ExhaustedRetries` once the attempt budget is spent.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

use super::circuit_breaker::{BreakerConfig, CircuitBreakerRegistry, endpoint_key};
use super::constants::{CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use super::event::{FetchEvent, FetchObserver, FetchOutcome};
use super::rate_limiter::{RateLimitConfig, RateLimiter};
use super::retry::{RetryDecision, RetryPolicy};
use super::{AttemptError, FetchError};
use crate::user_agent;

/// Construction parameters for [`ResilientClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default retry policy.
    pub retry: RetryPolicy,
    /// Default per-request timeout.
    pub timeout: Duration,
    /// Default token bucket parameters.
    pub rate_limit: RateLimitConfig,
    /// Circuit breaker parameters.
    pub breaker: BreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            rate_limit: RateLimitConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Per-request options.
///
/// `source` selects the rate-limit bucket and prefixes the circuit key.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Source the request is made for.
    pub source: String,
    /// Overrides the client's default timeout.
    pub timeout: Option<Duration>,
    /// Overrides the client's default retry policy.
    pub retry: Option<RetryPolicy>,
    /// Query pairs appended to the URL.
    pub query: Vec<(String, String)>,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Bearer credential.
    pub bearer: Option<String>,
    /// JSON request body.
    pub json: Option<serde_json::Value>,
}

impl RequestOptions {
    /// Options for a request on behalf of `source`.
    #[must_use]
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Appends a query pair.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the bearer credential.
    #[must_use]
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Sets a JSON body.
    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    /// Overrides the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

/// A validated 2xx response with its body read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// HTTP status.
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    /// `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// Response body as text.
    pub body: String,
}

impl FetchResponse {
    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// HTTP client wrapping every call with rate limiting, circuit breaking and
/// retries.
///
/// Cheap to clone; clones share the connection pool, buckets and circuits.
#[derive(Clone)]
pub struct ResilientClient {
    http: Client,
    limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    timeout: Duration,
    observer: Option<Arc<dyn FetchObserver>>,
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl ResilientClient {
    /// Creates a client with its own rate limiter and circuit registry.
    ///
    /// # Errors
    ///
    /// Returns the reqwest error if the HTTP client cannot be built (TLS
    /// backend initialization).
    pub fn new(config: ClientConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self {
            http,
            limiter: Arc::new(RateLimiter::new(config.rate_limit)),
            breakers: Arc::new(CircuitBreakerRegistry::new(config.breaker)),
            retry: config.retry,
            timeout: config.timeout,
            observer: None,
        })
    }

    /// Attaches an observer that receives every [`FetchEvent`].
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn FetchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Shared per-source rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Shared per-endpoint circuit registry.
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Default retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Shortcut for `GET`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn get(&self, url: &str, options: &RequestOptions) -> Result<FetchResponse, FetchError> {
        self.request(Method::GET, url, options).await
    }

    /// Shortcut for `POST`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn post(&self, url: &str, options: &RequestOptions) -> Result<FetchResponse, FetchError> {
        self.request(Method::POST, url, options).await
    }

    /// Performs a request with retries, circuit breaking and rate limiting.
    ///
    /// # Errors
    ///
    /// - [`FetchError::RateLimited`] if no token arrives within the wait bound
    /// - [`FetchError::CircuitOpen`] if the endpoint's circuit rejects the attempt
    /// - [`FetchError::RequestFailed`] on a non-retryable failure (or invalid URL)
    /// - [`FetchError::ExhaustedRetries`] when every attempt failed retryably
    #[instrument(skip(self, options), fields(source = %options.source))]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<FetchResponse, FetchError> {
        let mut parsed = match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => parsed,
            _ => return Err(FetchError::request_failed(url, AttemptError::invalid_url(url))),
        };
        let endpoint = endpoint_key(&options.source, &parsed);
        if !options.query.is_empty() {
            parsed
                .query_pairs_mut()
                .extend_pairs(options.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        let policy = options.retry.as_ref().unwrap_or(&self.retry);
        let timeout = options.timeout.unwrap_or(self.timeout);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            if let Err(error) = self.limiter.acquire(&options.source).await {
                self.emit(options, &endpoint, &method, &parsed, attempt, Duration::ZERO, FetchOutcome::RateLimited);
                return Err(error);
            }
            if let Err(error) = self.breakers.check(&endpoint).await {
                self.emit(options, &endpoint, &method, &parsed, attempt, Duration::ZERO, FetchOutcome::CircuitOpen);
                return Err(error);
            }

            let started = Instant::now();
            let result = self.send_once(&method, &parsed, options, timeout).await;
            let latency = started.elapsed();

            let error = match result {
                Ok(response) => {
                    self.breakers.record_success(&endpoint).await;
                    self.emit(
                        options,
                        &endpoint,
                        &method,
                        &parsed,
                        attempt,
                        latency,
                        FetchOutcome::Success {
                            status: response.status,
                        },
                    );
                    return Ok(response);
                }
                Err(error) => error,
            };

            self.breakers.record_failure(&endpoint).await;
            self.emit(options, &endpoint, &method, &parsed, attempt, latency, outcome_of(&error));

            let failure_type = policy.classify(&error);
            match policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    let delay = match error.retry_after() {
                        Some(server_delay) => {
                            self.limiter.record_server_delay(&options.source, server_delay);
                            server_delay
                        }
                        None => delay,
                    };
                    debug!(
                        url = %parsed,
                        next_attempt = next,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %parsed, attempt, reason, "giving up");
                    if failure_type.is_retryable() {
                        return Err(FetchError::exhausted(url, attempt, error));
                    }
                    return Err(FetchError::request_failed(url, error));
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<FetchResponse, AttemptError> {
        let mut request = self.http.request(method.clone(), url.clone()).timeout(timeout);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &options.bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = &options.json {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::network(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(AttemptError::http_status_with_retry_after(
                url.as_str(),
                status.as_u16(),
                retry_after,
            ));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::network(url.as_str(), e))?;

        Ok(FetchResponse {
            status: status.as_u16(),
            url: final_url,
            content_type,
            body,
        })
    }

    #[allow(clippy::too_many_arguments, clippy::cast_possible_truncation)]
    fn emit(
        &self,
        options: &RequestOptions,
        endpoint: &str,
        method: &Method,
        url: &Url,
        attempt: u32,
        latency: Duration,
        outcome: FetchOutcome,
    ) {
        let event = FetchEvent {
            source: options.source.clone(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            url: url.to_string(),
            attempt,
            latency_ms: latency.as_millis() as u64,
            outcome,
        };
        event.log();
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }
}

fn outcome_of(error: &AttemptError) -> FetchOutcome {
    match error {
        AttemptError::HttpStatus { status, .. } => FetchOutcome::HttpError { status: *status },
        AttemptError::Timeout { .. } => FetchOutcome::Timeout,
        AttemptError::Network { .. } | AttemptError::InvalidUrl { .. } => FetchOutcome::NetworkError,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_options_builder() {
        let options = RequestOptions::for_source("wire")
            .query("page", "2")
            .header("x-trace", "1")
            .bearer("tok")
            .timeout(Duration::from_secs(5));
        assert_eq!(options.source, "wire");
        assert_eq!(options.query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(options.headers.len(), 1);
        assert_eq!(options.bearer.as_deref(), Some("tok"));
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_fetch_response_json() {
        let response = FetchResponse {
            status: 200,
            url: "https://e.com".to_string(),
            content_type: Some("application/json".to_string()),
            body: r#"{"token":"abc"}"#.to_string(),
        };
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["token"], "abc");
    }

    #[test]
    fn test_outcome_of_maps_errors() {
        assert_eq!(
            outcome_of(&AttemptError::http_status("u", 503)),
            FetchOutcome::HttpError { status: 503 }
        );
        assert_eq!(outcome_of(&AttemptError::timeout("u")), FetchOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_invalid_url_fails_without_attempt() {
        let client = ResilientClient::new(ClientConfig::default()).unwrap();
        let err = client
            .get("ftp://example.com/x", &RequestOptions::for_source("wire"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::RequestFailed {
                source: AttemptError::InvalidUrl { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_open_circuit_short_circuits_before_network() {
        let client = ResilientClient::new(ClientConfig::default()).unwrap();
        // Nothing listens on port 9; reaching the network would be a Network error.
        let url = "http://127.0.0.1:9/news";
        let endpoint = endpoint_key("wire", &Url::parse(url).unwrap());
        client.breakers().force_open(&endpoint).await;

        let err = client
            .get(url, &RequestOptions::for_source("wire"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::CircuitOpen { .. }), "got {err}");
    }
}
