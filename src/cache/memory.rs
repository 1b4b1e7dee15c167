//! In-process cache backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{CacheBackend, CacheError};

/// Writes between sweeps of expired entries.
const SWEEP_EVERY_WRITES: u64 = 64;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// `DashMap`-backed cache with lazy TTL expiry.
///
/// A read past TTL removes the entry and reports it absent. Keys that are
/// never read again are swept every few writes. Each `set` replaces the whole
/// entry under the shard lock, so writes are atomic per key (last write wins).
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, Entry>,
    writes: AtomicU64,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry past its TTL.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| now < entry.expires_at);
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if now < entry.expires_at => return Ok(Some(entry.value.clone())),
            Some(_) => true,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| now >= entry.expires_at);
        }
        Ok(None)
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY_WRITES == 0 {
            self.purge_expired();
        }
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let backend = MemoryBackend::new();
        backend
            .set_raw("k", "v".to_string(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(backend.get_raw("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_read_past_ttl_is_absent_and_evicted() {
        tokio::time::pause();
        let backend = MemoryBackend::new();
        backend
            .set_raw("k", "v".to_string(), Duration::from_secs(5))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(backend.get_raw("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_unread_expired_entries_are_swept_by_writes() {
        tokio::time::pause();
        let backend = MemoryBackend::new();
        backend.set_raw("stale", "v".into(), Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        for i in 1..SWEEP_EVERY_WRITES {
            backend
                .set_raw(&format!("fresh:{i}"), "v".into(), Duration::from_secs(60))
                .await
                .unwrap();
        }

        assert!(!backend.entries.contains_key("stale"));
        assert_eq!(backend.len(), usize::try_from(SWEEP_EVERY_WRITES - 1).unwrap());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let backend = MemoryBackend::new();
        backend.set_raw("k", "a".into(), Duration::from_secs(10)).await.unwrap();
        backend.set_raw("k", "b".into(), Duration::from_secs(10)).await.unwrap();
        assert_eq!(backend.get_raw("k").await.unwrap().as_deref(), Some("b"));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let backend = MemoryBackend::new();
        backend.set_raw("k", "v".into(), Duration::from_secs(10)).await.unwrap();
        backend.delete("k").await.unwrap();
        assert_eq!(backend.get_raw("k").await.unwrap(), None);
    }
}
