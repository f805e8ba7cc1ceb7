use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;

use super::core::{AsyncNext, AsyncPlugin, Invocation, Next, Plugin};
use crate::callable::Resolved;
use crate::error::BindError;

/// Entries kept by [`CachePlugin::new`].
pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::MIN.saturating_add(999);

struct Entries {
    lru: LruCache<String, (Instant, Value)>,
    last_sweep: Instant,
}

/// Pre plugin caching handler results in memory.
///
/// Entries are keyed by route id and the request's path and query mappings, so
/// routes whose result depends on headers, cookies or the body should not use
/// it. Only plain JSON results are cached; errors and shared objects always go
/// through.
///
/// The cache holds at most `capacity` entries, evicting the least recently
/// used. Expired entries are dropped when looked up, and a store sweeps all of
/// them at most once per TTL.
pub struct CachePlugin {
    ttl: Duration,
    entries: Mutex<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CachePlugin {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: NonZeroUsize) -> Self {
        CachePlugin {
            ttl,
            entries: Mutex::new(Entries {
                lru: LruCache::new(capacity),
                last_sweep: Instant::now(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries dropped for capacity or expiry.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().lru.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().lru.is_empty()
    }

    /// Drop every entry of `route`.
    pub fn invalidate_route(&self, route: &str) {
        let prefix = format!("{route}\n");
        let mut entries = self.entries.lock();
        let stale: Vec<String> = entries
            .lru
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            entries.lru.pop(&key);
        }
    }

    /// Drop every expired entry now.
    pub fn purge_expired(&self) {
        let mut entries = self.entries.lock();
        self.sweep(&mut entries);
    }

    pub fn clear(&self) {
        self.entries.lock().lru.clear();
    }

    fn key(inv: &Invocation) -> String {
        let request = inv.context.request();
        let parts = json!({
            "path": request.url_path(),
            "path_params": request.path(),
            "query": request.multi_query(),
        });
        format!("{}\n{}", inv.core.route_id, parts)
    }

    fn sweep(&self, entries: &mut Entries) {
        let expired: Vec<String> = entries
            .lru
            .iter()
            .filter(|(_, (stored, _))| stored.elapsed() >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.lru.pop(key);
        }
        entries.last_sweep = Instant::now();
        if !expired.is_empty() {
            self.evictions.fetch_add(expired.len() as u64, Ordering::Relaxed);
            debug!(count = expired.len(), "Cache swept expired entries");
        }
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        let found = entries
            .lru
            .get(key)
            .map(|(stored, value)| (stored.elapsed() < self.ttl, value.clone()));
        let fresh = match found {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                entries.lru.pop(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        };
        drop(entries);
        match fresh {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn store(&self, key: String, result: &Result<Resolved, BindError>) {
        if let Ok(Resolved::Value(value)) = result {
            let mut entries = self.entries.lock();
            if entries.last_sweep.elapsed() >= self.ttl {
                self.sweep(&mut entries);
            }
            if let Some((evicted, _)) = entries.lru.push(key.clone(), (Instant::now(), value.clone())) {
                if evicted != key {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

impl Plugin for CachePlugin {
    fn call(&self, inv: Invocation, next: Next<'_>) -> Result<Resolved, BindError> {
        let key = Self::key(&inv);
        if let Some(value) = self.lookup(&key) {
            return Ok(Resolved::Value(value));
        }
        let result = next.run(inv);
        self.store(key, &result);
        result
    }
}

impl AsyncPlugin for CachePlugin {
    fn call<'a>(&'a self, inv: Invocation, next: AsyncNext<'a>) -> BoxFuture<'a, Result<Resolved, BindError>> {
        Box::pin(async move {
            let key = Self::key(&inv);
            if let Some(value) = self.lookup(&key) {
                return Ok(Resolved::Value(value));
            }
            let result = next.run(inv).await;
            self.store(key, &result);
            result
        })
    }
}
