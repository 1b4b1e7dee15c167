//! Caching with degrade-to-memory fallback.
//!
//! [`CacheStore`] binds to a networked backend when one is configured and
//! answers its startup probe, otherwise to the in-process
//! [`MemoryBackend`]. If the networked backend fails later, the store
//! switches to memory for the rest of the process and never switches back,
//! so behavior within a run stays predictable. The switch is logged once.
//!
//! Values are serialized as JSON, so numbers, strings and nested
//! maps/sequences round-trip losslessly.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use newswire::cache::{CacheError, CacheStore};
//!
//! # async fn example() -> Result<(), CacheError> {
//! let cache = CacheStore::in_memory();
//! let page: String = cache
//!     .memoize("page:wire:https://example.com", Duration::from_secs(300), || async {
//!         Ok::<_, CacheError>("<html>...</html>".to_string())
//!     })
//!     .await?;
//! assert_eq!(cache.get::<String>("page:wire:https://example.com").await?, Some(page));
//! # Ok(())
//! # }
//! ```

mod error;
mod memory;
mod networked;

pub use error::CacheError;
pub use memory::MemoryBackend;
pub use networked::RedisBackend;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

/// Raw string storage with TTL.
#[async_trait]
pub trait CacheBackend: Send + Sync + fmt::Debug {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Returns the stored payload, or `None` when absent or expired.
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key` for `ttl`, replacing any previous value.
    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Removes `key`.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups that found a value.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// `hits / (hits + misses)`, 0.0 before any lookup.
    pub hit_ratio: f64,
    /// True once the store runs on the in-process fallback.
    pub degraded: bool,
}

/// Cache facade with one-way fallback to memory.
pub struct CacheStore {
    primary: Option<Arc<dyn CacheBackend>>,
    fallback: MemoryBackend,
    degraded: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend_name())
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Store running on the in-process backend only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            primary: None,
            fallback: MemoryBackend::new(),
            degraded: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Store bound to `backend`, falling back to memory if it fails.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            primary: Some(backend),
            ..Self::in_memory()
        }
    }

    /// Connects to the networked cache at `url`, or binds to memory when no
    /// URL is given or the probe fails.
    ///
    /// Never fails: an unreachable backend is logged (once) and ingestion
    /// continues on the in-process map.
    #[instrument(skip(url), fields(configured = url.is_some()))]
    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else {
            debug!("no cache URL configured, using in-process cache");
            return Self::in_memory();
        };
        match RedisBackend::connect(url).await {
            Ok(backend) => {
                info!("using networked cache");
                Self::with_backend(Arc::new(backend))
            }
            Err(error) => {
                let store = Self::in_memory();
                store.degrade(&error);
                store
            }
        }
    }

    /// Returns true once the store has fallen back to memory.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Name of the backend currently serving requests.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        match self.active_primary() {
            Some(primary) => primary.name(),
            None => self.fallback.name(),
        }
    }

    fn active_primary(&self) -> Option<&Arc<dyn CacheBackend>> {
        if self.is_degraded() {
            None
        } else {
            self.primary.as_ref()
        }
    }

    /// Switches to the fallback for good; warns only on the first call.
    fn degrade(&self, error: &CacheError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(error = %error, "cache unavailable, falling back to in-process cache for this run");
        }
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(primary) = self.active_primary() {
            match primary.get_raw(key).await {
                Ok(value) => return Ok(value),
                Err(error) => self.degrade(&error),
            }
        }
        self.fallback.get_raw(key).await
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        if let Some(primary) = self.active_primary() {
            match primary.set_raw(key, value.clone(), ttl).await {
                Ok(()) => return Ok(()),
                Err(error) => self.degrade(&error),
            }
        }
        self.fallback.set_raw(key, value, ttl).await
    }

    /// Reads and deserializes `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Deserialization`] when the stored payload does
    /// not decode as `T`. Backend failures degrade instead of erroring.
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.get_raw(key).await? else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        self.hits.fetch_add(1, Ordering::Relaxed);
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| CacheError::deserialization(key, e))
    }

    /// Serializes and stores `value` under `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] when `value` cannot be encoded.
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value).map_err(|e| CacheError::serialization(key, e))?;
        self.set_raw(key, raw, ttl).await
    }

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Only the fallback can be reached after a failure, so this does not
    /// fail in practice; the signature matches the backend trait.
    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        if let Some(primary) = self.active_primary() {
            match primary.delete(key).await {
                Ok(()) => return Ok(()),
                Err(error) => self.degrade(&error),
            }
        }
        self.fallback.delete(key).await
    }

    /// Returns the cached value for `key`, or runs `producer`, stores its
    /// result for `ttl` and returns it.
    ///
    /// On a hit the producer is not invoked. Concurrent misses for the same
    /// key may each run the producer; the last write wins. A producer error
    /// is returned as-is and nothing is cached.
    ///
    /// # Errors
    ///
    /// Propagates producer errors and [`CacheError::Serialization`] (via
    /// `E: From<CacheError>`).
    pub async fn memoize<T, E, F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get::<T>(key).await {
            Ok(Some(value)) => {
                debug!(key, "cache hit");
                return Ok(value);
            }
            Ok(None) => debug!(key, "cache miss"),
            Err(error) => warn!(key, error = %error, "discarding undecodable cache entry"),
        }

        let value = producer().await?;
        self.set(key, &value, ttl).await?;
        Ok(value)
    }

    /// Current counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_ratio = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        CacheStats {
            hits,
            misses,
            hit_ratio,
            degraded: self.is_degraded(),
        }
    }

    /// `hits / (hits + misses)`, 0.0 before any lookup.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        self.stats().hit_ratio
    }
}
