//! Per-source token-bucket rate limiting.
//!
//! Each source owns a bucket with a capacity and a refill rate. Refill is
//! lazy: tokens are recomputed from elapsed time on every `acquire`, so idle
//! sources cost nothing and no background timer runs.
//!
//! When the bucket is empty the caller reserves the next token (the count
//! goes negative) and sleeps until it would have been refilled. Reservations
//! queue naturally: a second waiter sees a deeper deficit and sleeps longer.
//! If the required wait exceeds the configured bound, `acquire` fails with
//! [`FetchError::RateLimited`] without reserving anything.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use newswire::fetch::{RateLimitConfig, RateLimiter};
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(RateLimitConfig {
//!     capacity: 2,
//!     refill_per_sec: 1.0,
//!     max_wait: Duration::from_secs(5),
//! });
//!
//! // Two tokens available immediately
//! limiter.acquire("wire").await.unwrap();
//! limiter.acquire("wire").await.unwrap();
//!
//! // Other sources have their own bucket
//! limiter.acquire("other").await.unwrap();
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::FetchError;
use super::constants::{CUMULATIVE_WAIT_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum tokens held (burst size).
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
    /// Longest a caller may wait for a token.
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            refill_per_sec: 1.0,
            max_wait: Duration::from_secs(10),
        }
    }
}

/// Per-source rate limiter.
///
/// Designed to be wrapped in `Arc` and shared across Tokio tasks. `DashMap`
/// holds per-source state; the bucket itself sits behind a
/// `tokio::sync::Mutex` so the read-refill-decrement cycle is atomic per
/// source without contention between sources.
#[derive(Debug)]
pub struct RateLimiter {
    /// Parameters for sources without an override.
    defaults: RateLimitConfig,

    /// Whether rate limiting is disabled.
    disabled: bool,

    /// Per-source parameter overrides.
    overrides: DashMap<String, RateLimitConfig>,

    /// Per-source state.
    /// Uses Arc to allow cloning the state and releasing the `DashMap` lock
    /// before awaiting on the inner Mutex (prevents shard lock across await).
    buckets: DashMap<String, Arc<SourceState>>,
}

#[derive(Debug)]
struct SourceState {
    bucket: Mutex<Bucket>,

    /// Cumulative time callers spent waiting on this source (in milliseconds).
    /// Used to warn when excessive rate limiting occurs.
    cumulative_wait_ms: AtomicU64,
}

/// The `RateWindow` of one source.
#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    config: RateLimitConfig,
}

impl Bucket {
    fn full(config: RateLimitConfig) -> Self {
        Self {
            tokens: f64::from(config.capacity),
            last_refill: Instant::now(),
            config,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.refill_per_sec)
            .min(f64::from(self.config.capacity));
        self.last_refill = now;
    }
}

impl SourceState {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            bucket: Mutex::new(Bucket::full(config)),
            cumulative_wait_ms: AtomicU64::new(0),
        }
    }

    /// Adds to the cumulative wait and returns the new total.
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_wait(&self, wait: Duration) -> Duration {
        let wait_ms = wait.as_millis() as u64;
        let new_total = self.cumulative_wait_ms.fetch_add(wait_ms, Ordering::SeqCst) + wait_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a rate limiter applying `defaults` to every source.
    #[must_use]
    #[instrument(skip_all, fields(capacity = defaults.capacity, refill = defaults.refill_per_sec))]
    pub fn new(defaults: RateLimitConfig) -> Self {
        debug!("creating rate limiter");
        Self {
            defaults,
            disabled: false,
            overrides: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Creates a disabled rate limiter that never waits.
    #[must_use]
    #[instrument]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            defaults: RateLimitConfig::default(),
            disabled: true,
            overrides: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the default bucket parameters.
    #[must_use]
    pub fn defaults(&self) -> RateLimitConfig {
        self.defaults
    }

    /// Overrides the bucket parameters of one source.
    ///
    /// Takes effect for buckets created afterwards; call before the source's
    /// first request.
    pub fn configure(&self, key: &str, config: RateLimitConfig) {
        debug!(source = key, capacity = config.capacity, refill = config.refill_per_sec, "rate override");
        self.overrides.insert(key.to_string(), config);
    }

    /// Takes one token for `key`, waiting for a refill if necessary.
    ///
    /// Returns how long the caller waited.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::RateLimited`] when the next token is further away
    /// than the configured wait bound.
    #[instrument(skip(self))]
    pub async fn acquire(&self, key: &str) -> Result<Duration, FetchError> {
        if self.disabled {
            return Ok(Duration::ZERO);
        }

        // Get or create state, clone Arc to release DashMap lock before awaiting
        let state = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                let config = self.overrides.get(key).map_or(self.defaults, |c| *c);
                Arc::new(SourceState::new(config))
            })
            .clone();

        let wait = {
            let mut bucket = state.bucket.lock().await;
            bucket.refill(Instant::now());

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                return Ok(Duration::ZERO);
            }

            // A tiny refill rate can push the wait past what Duration holds.
            let wait_secs = (1.0 - bucket.tokens) / bucket.config.refill_per_sec;
            let wait = Duration::try_from_secs_f64(wait_secs).unwrap_or(Duration::MAX);
            if wait > bucket.config.max_wait {
                debug!(source = key, wait_ms = wait.as_millis(), "rate limit wait exceeds bound");
                return Err(FetchError::rate_limited(key, wait));
            }
            // Reserve the token now so concurrent callers queue behind us.
            bucket.tokens -= 1.0;
            wait
        };

        let cumulative = state.add_cumulative_wait(wait);
        debug!(
            source = key,
            wait_ms = wait.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "waiting for rate limit token"
        );
        if cumulative >= CUMULATIVE_WAIT_WARNING_THRESHOLD {
            warn!(
                source = key,
                cumulative_wait_secs = cumulative.as_secs(),
                "excessive rate limiting - consider lowering request volume for this source"
            );
        }

        tokio::time::sleep(wait).await;
        Ok(wait)
    }

    /// Records a server-mandated delay (from a Retry-After header) against
    /// the source's cumulative wait.
    #[instrument(skip(self))]
    pub fn record_server_delay(&self, key: &str, delay: Duration) {
        let state = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                let config = self.overrides.get(key).map_or(self.defaults, |c| *c);
                Arc::new(SourceState::new(config))
            })
            .clone();
        let cumulative = state.add_cumulative_wait(delay);

        debug!(
            source = key,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_WAIT_WARNING_THRESHOLD {
            warn!(
                source = key,
                cumulative_wait_secs = cumulative.as_secs(),
                "excessive server rate limiting - source may be under heavy load"
            );
        }
    }

    /// Tokens currently available for `key` (after lazy refill), if its
    /// bucket exists.
    pub async fn available(&self, key: &str) -> Option<f64> {
        let state = self.buckets.get(key).map(|s| Arc::clone(s.value()))?;
        let mut bucket = state.bucket.lock().await;
        bucket.refill(Instant::now());
        Some(bucket.tokens)
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use newswire::fetch::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        if let Ok(duration) = datetime.duration_since(now) {
            if duration > MAX_RETRY_AFTER {
                warn!(
                    delay_secs = duration.as_secs(),
                    max_secs = MAX_RETRY_AFTER.as_secs(),
                    "Retry-After date exceeds maximum, capping at 1 hour"
                );
                return Some(MAX_RETRY_AFTER);
            }
            Some(duration)
        } else {
            debug!(header_value, "Retry-After date is in the past, returning zero");
            Some(Duration::ZERO)
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(capacity: u32, refill_per_sec: f64, max_wait_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            capacity,
            refill_per_sec,
            max_wait: Duration::from_millis(max_wait_ms),
        }
    }

    // ==================== RateLimiter Tests ====================

    #[test]
    fn test_rate_limiter_disabled_flag() {
        assert!(RateLimiter::disabled().is_disabled());
        assert!(!RateLimiter::new(RateLimitConfig::default()).is_disabled());
    }

    #[tokio::test]
    async fn test_rate_limiter_disabled_no_delay() {
        tokio::time::pause();

        let limiter = RateLimiter::disabled();
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire("wire").await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_second_acquire_waits_one_refill() {
        tokio::time::pause();

        let limiter = RateLimiter::new(config(1, 1.0, 5_000));
        let start = Instant::now();

        limiter.acquire("wire").await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));

        let waited = limiter.acquire("wire").await.unwrap();
        assert!(waited >= Duration::from_millis(990), "waited {waited:?}");
        assert!(start.elapsed() >= Duration::from_millis(990));
        assert!(start.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test]
    async fn test_burst_up_to_capacity_is_immediate() {
        tokio::time::pause();

        let limiter = RateLimiter::new(config(3, 1.0, 5_000));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire("wire").await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_wait_beyond_bound_is_rate_limited() {
        tokio::time::pause();

        let limiter = RateLimiter::new(config(1, 1.0, 500));
        limiter.acquire("wire").await.unwrap();

        let err = limiter.acquire("wire").await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { .. }), "got {err}");

        // A rejection reserves nothing: after one refill the token is there.
        tokio::time::advance(Duration::from_secs(1)).await;
        let waited = limiter.acquire("wire").await.unwrap();
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_unrepresentable_wait_is_rate_limited() {
        tokio::time::pause();

        let limiter = RateLimiter::new(config(1, 1e-30, 10_000));
        limiter.acquire("slow").await.unwrap();

        let err = limiter.acquire("slow").await.unwrap_err();
        match err {
            FetchError::RateLimited { source_name, wait } => {
                assert_eq!(source_name, "slow");
                assert_eq!(wait, Duration::MAX);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        tokio::time::pause();

        let limiter = RateLimiter::new(config(1, 1.0, 5_000));
        let start = Instant::now();
        limiter.acquire("a").await.unwrap();
        limiter.acquire("b").await.unwrap();
        limiter.acquire("c").await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_refill_is_capped_at_capacity() {
        tokio::time::pause();

        let limiter = RateLimiter::new(config(2, 10.0, 5_000));
        limiter.acquire("wire").await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;

        let available = limiter.available("wire").await.unwrap();
        assert!((available - 2.0).abs() < f64::EPSILON, "available {available}");
    }

    #[tokio::test]
    async fn test_override_applies_to_source() {
        tokio::time::pause();

        let limiter = RateLimiter::new(config(1, 1.0, 5_000));
        limiter.configure("burst", config(4, 1.0, 5_000));

        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire("burst").await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_concurrent_waiters_queue() {
        tokio::time::pause();

        let limiter = Arc::new(RateLimiter::new(config(1, 1.0, 5_000)));
        limiter.acquire("wire").await.unwrap();

        let first = tokio::spawn({
            let limiter = Arc::clone(&limiter);
            async move { limiter.acquire("wire").await.unwrap() }
        });
        let second = tokio::spawn({
            let limiter = Arc::clone(&limiter);
            async move { limiter.acquire("wire").await.unwrap() }
        });

        let mut waits = vec![first.await.unwrap(), second.await.unwrap()];
        waits.sort();
        assert!(waits[0] >= Duration::from_millis(990));
        assert!(waits[1] >= Duration::from_millis(1990));
    }

    #[test]
    fn test_record_server_delay_tracks_cumulative() {
        let limiter = RateLimiter::new(RateLimitConfig::default());

        limiter.record_server_delay("wire", Duration::from_secs(5));
        limiter.record_server_delay("wire", Duration::from_secs(10));

        let state = limiter.buckets.get("wire").unwrap();
        assert_eq!(state.cumulative_wait_ms.load(Ordering::SeqCst), 15_000);
    }

    // ==================== parse_retry_after Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("  120  "), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_negative_and_invalid() {
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("invalid"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_http_date_past() {
        let past_date = "Wed, 01 Jan 2020 00:00:00 GMT";
        assert_eq!(parse_retry_after(past_date), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_http_date_future() {
        let future_time = std::time::SystemTime::now() + Duration::from_secs(60);
        let future_date = httpdate::fmt_http_date(future_time);

        let duration = parse_retry_after(&future_date).unwrap();
        assert!(
            duration >= Duration::from_secs(55) && duration <= Duration::from_secs(65),
            "Duration should be ~60s, got {duration:?}"
        );
    }
}
