// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Generic TTL cache with in-flight refresh de-duplication, used by the quota engine's
//! 10s local-du cache and 60s provider-quota cache (§4.3).

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

struct Entry<V> {
    value: V,
    fetched_at: Instant,
}

/// A cache mapping `K -> V` with a fixed time-to-live, de-duplicating concurrent refreshes of
/// the same key: while one task is fetching a key, others wait on the same fetch rather than
/// issuing a second concurrent call (§4.3 "single in-flight refresh per root").
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: SyncMutex<HashMap<K, Entry<V>>>,
    locks: SyncMutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl,
            entries: SyncMutex::new(HashMap::new()),
            locks: SyncMutex::new(HashMap::new()),
        }
    }

    /// Returns a cached, non-stale value without triggering a refresh.
    pub fn peek(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.fetched_at.elapsed() < self.ttl => Some(entry.value.clone()),
            _ => None,
        }
    }

    /// Returns a cached value regardless of staleness (§4.3 monotonicity: a failed refresh must
    /// never clobber a prior value, so callers fall back to this when `refresh` fails).
    pub fn peek_stale(&self, key: &K) -> Option<V> {
        self.entries.lock().get(key).map(|entry| entry.value.clone())
    }

    fn key_lock(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
    }

    /// Fetches the cached value if fresh, otherwise runs `fetch` to populate it. A failed fetch
    /// leaves the cache untouched; callers fall back to [`Self::peek_stale`] themselves.
    pub async fn get_or_refresh<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.peek(&key) {
            return Ok(value);
        }

        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        // Re-check: another task may have refreshed while we waited for the lock.
        if let Some(value) = self.peek(&key) {
            return Ok(value);
        }

        let result = fetch().await;
        if let Ok(value) = &result {
            self.entries.lock().insert(
                key,
                Entry {
                    value: value.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        result
    }
}

pub type SharedTtlCache<K, V> = Arc<TtlCache<K, V>>;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn caches_within_ttl() {
        let cache: TtlCache<String, u64> = TtlCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value: Result<u64, ()> = cache
                .get_or_refresh("root".to_owned(), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await;
            assert_eq!(value.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_prior_value() {
        let cache: TtlCache<String, u64> = TtlCache::new(Duration::from_millis(1));
        let _: Result<u64, ()> = cache.get_or_refresh("root".to_owned(), || async { Ok(7) }).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result: Result<u64, &str> = cache
            .get_or_refresh("root".to_owned(), || async { Err("provider timeout") })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.peek_stale(&"root".to_owned()), Some(7));
    }
}
