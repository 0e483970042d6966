//! In-memory TTL cache with per-key single-flight
//!
//! Entries live until TTL expiry or engine shutdown, whichever is first;
//! a TTL of zero means no expiry. Expired entries are evicted lazily on
//! read.
//!
//! # Single-flight
//!
//! At most one concurrent producer runs per key: a `get_or_compute` that
//! misses while another task is already computing the same key parks on
//! that key's flight lock, then re-checks the store and observes the
//! first producer's value instead of recomputing. Different keys never
//! contend.

use crate::error::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
// tokio's Instant respects the paused test clock, which the TTL tests
// rely on; it is identical to std's Instant at runtime.
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    /// `None` = never expires (TTL 0)
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Value, ttl_secs: u64) -> Self {
        let expires_at = if ttl_secs == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_secs(ttl_secs))
        };
        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// Engine-scoped value cache.
///
/// Cheap to clone; clones share the same store and flight locks.
#[derive(Clone)]
pub struct TtlCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    flights: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Look a key up; expired entries read as a miss and are evicted.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Store a value. TTL is in seconds; 0 = no expiry.
    pub fn set(&self, key: &str, value: Value, ttl_secs: u64) {
        self.entries
            .lock()
            .insert(key.to_string(), CacheEntry::new(value, ttl_secs));
    }

    /// Remove one key. Returns whether it was present (and fresh).
    pub fn delete(&self, key: &str) -> bool {
        match self.entries.lock().remove(key) {
            Some(entry) => !entry.is_expired(),
            None => false,
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Get, or compute-and-store under this key's flight lock.
    ///
    /// The producer future runs at most once per key per miss window;
    /// concurrent callers for the same key wait and then read the stored
    /// value. A failing producer releases the flight lock without
    /// storing, so the next caller retries.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl_secs: u64, producer: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let flight = {
            let mut flights = self.flights.lock();
            flights
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = flight.lock().await;

        // Re-check: another flight may have landed while we waited.
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = producer().await?;
        self.set(key, value.clone(), ttl_secs);
        Ok(value)
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_set_get_delete() {
        let cache = TtlCache::new();
        cache.set("k", json!(42), 0);
        assert_eq!(cache.get("k"), Some(json!(42)));
        assert!(cache.delete("k"));
        assert_eq!(cache.get("k"), None);
        assert!(!cache.delete("k"));
    }

    #[test]
    fn test_clear() {
        let cache = TtlCache::new();
        cache.set("a", json!(1), 0);
        cache.set("b", json!(2), 0);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_is_lazy() {
        let cache = TtlCache::new();
        cache.set("k", json!(1), 1);
        assert_eq!(cache.get("k"), Some(json!(1)));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_expires() {
        let cache = TtlCache::new();
        cache.set("k", json!(1), 0);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(cache.get("k"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_single_flight_producer_runs_once() {
        let cache = TtlCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("K", 0, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!(42))
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), json!(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_producer_releases_flight() {
        let cache = TtlCache::new();
        let err = cache
            .get_or_compute("k", 0, || async {
                Err(crate::error::EngineError::TransportError("boom".into()))
            })
            .await;
        assert!(err.is_err());

        // A later caller gets to produce.
        let value = cache
            .get_or_compute("k", 0, || async { Ok(json!(7)) })
            .await
            .unwrap();
        assert_eq!(value, json!(7));
    }
}
