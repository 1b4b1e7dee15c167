//! Resilient outbound HTTP.
//!
//! Every call a connector makes (listing pages, API pages, adapter auth and
//! transform) goes through [`ResilientClient`], which layers the per-source
//! [`RateLimiter`], the per-endpoint [`CircuitBreakerRegistry`] and the
//! [`RetryPolicy`] around a shared `reqwest` client.
//!
//! # Example
//!
//! ```no_run
//! use newswire::fetch::{ClientConfig, RequestOptions, ResilientClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ResilientClient::new(ClientConfig::default())?;
//! let response = client
//!     .get("https://example.com/markets", &RequestOptions::for_source("wire"))
//!     .await?;
//! println!("{} bytes", response.body.len());
//! # Ok(())
//! # }
//! ```

mod circuit_breaker;
mod client;
pub mod constants;
mod error;
mod event;
pub mod rate_limiter;
mod retry;

pub use circuit_breaker::{BreakerConfig, CircuitBreakerRegistry, CircuitState, endpoint_key};
pub use client::{ClientConfig, FetchResponse, RequestOptions, ResilientClient};
pub use error::{AttemptError, FetchError};
pub use event::{FETCH_EVENT_TARGET, FetchEvent, FetchObserver, FetchOutcome};
pub use rate_limiter::{RateLimitConfig, RateLimiter, parse_retry_after};
pub use retry::{FailureType, RetryDecision, RetryPolicy};
