// PERFORMANCE: Response Cache (TTL + LRU)
//
// Repeat requests are served from memory instead of re-running
// inference. TTL bounds staleness, LRU bounds memory on a constrained
// device; the two rules are independent and whichever triggers first
// evicts an entry. A single lock guards the map, the recency order, and
// the hit/miss counters together as one atomic unit per operation.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Clone)]
struct CacheEntry {
    value: String,
    created_at: Instant,
    last_accessed_at: Instant,
    access_count: u64,
    size_bytes: usize,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

struct CacheInner {
    map: HashMap<String, CacheEntry>,
    /// Recency order, least-recently-used at the front.
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl CacheInner {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.map.remove(key)
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }
}

pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    max_entries: usize,
    default_ttl: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hit_rate: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_size_bytes: usize,
    pub ttl_hours: f64,
}

impl ResponseCache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
            max_entries: max_entries.max(1),
            default_ttl,
        }
    }

    /// Deterministic request fingerprint over a call's identity and
    /// arguments. Keyword arguments are sorted by name so argument
    /// order never changes the key. Hash collisions are accepted as a
    /// theoretical risk of the underlying hash.
    pub fn fingerprint(
        identity: &str,
        args: &[serde_json::Value],
        kwargs: &[(String, serde_json::Value)],
    ) -> String {
        let mut sorted: Vec<&(String, serde_json::Value)> = kwargs.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical = serde_json::json!({
            "function": identity,
            "args": args,
            "kwargs": sorted
                .iter()
                .map(|(k, v)| serde_json::json!([k, v]))
                .collect::<Vec<_>>(),
        });
        blake3::hash(canonical.to_string().as_bytes())
            .to_hex()
            .to_string()
    }

    /// Look up a cached value. Expired entries are evicted lazily here;
    /// a hit refreshes recency and access metadata.
    pub async fn get(&self, key: &str) -> Option<String> {
        enum Lookup {
            Miss,
            Expired,
            Hit,
        }

        let mut inner = self.inner.lock().await;
        let lookup = match inner.map.get(key) {
            None => Lookup::Miss,
            Some(entry) if entry.is_expired() => Lookup::Expired,
            Some(_) => Lookup::Hit,
        };
        match lookup {
            Lookup::Miss => {
                inner.misses += 1;
                None
            }
            Lookup::Expired => {
                inner.remove(key);
                inner.misses += 1;
                debug!("Cache entry expired on lookup");
                None
            }
            Lookup::Hit => {
                inner.hits += 1;
                inner.touch(key);
                let entry = inner.map.get_mut(key).expect("entry present");
                entry.last_accessed_at = Instant::now();
                entry.access_count += 1;
                Some(entry.value.clone())
            }
        }
    }

    pub async fn put(&self, key: &str, value: String) {
        self.put_with_ttl(key, value, self.default_ttl).await;
    }

    /// Insert with a per-entry TTL. At capacity the least-recently-used
    /// entry is evicted first (pure LRU; the recency queue preserves
    /// insertion order for never-read entries).
    pub async fn put_with_ttl(&self, key: &str, value: String, ttl: Duration) {
        let mut inner = self.inner.lock().await;
        let is_new = !inner.map.contains_key(key);
        if is_new {
            while inner.map.len() >= self.max_entries {
                if let Some(lru_key) = inner.order.front().cloned() {
                    inner.remove(&lru_key);
                    debug!("Evicted LRU cache entry");
                } else {
                    break;
                }
            }
        }
        let now = Instant::now();
        let size_bytes = value.len();
        inner.map.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                last_accessed_at: now,
                access_count: 1,
                size_bytes,
                ttl,
            },
        );
        inner.touch(key);
    }

    /// Remove every entry, returning how many were removed.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let removed = inner.map.len();
        inner.map.clear();
        inner.order.clear();
        if removed > 0 {
            info!("Cache cleared: {} entries removed", removed);
        }
        removed
    }

    /// Sweep out expired entries. Bounded cost; run opportunistically
    /// by the auto-optimizer between lookups.
    pub async fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let expired: Vec<String> = inner
            .map
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        if !expired.is_empty() {
            info!("Cleaned up {} expired cache entries", expired.len());
        }
        expired.len()
    }

    /// Release slack capacity held by the backing collections. Part of
    /// the optimizer's memory-reclaim pass under critical memory.
    pub async fn shrink(&self) {
        let mut inner = self.inner.lock().await;
        inner.map.shrink_to_fit();
        inner.order.shrink_to_fit();
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        let lookups = inner.hits + inner.misses;
        CacheStats {
            entries: inner.map.len(),
            max_entries: self.max_entries,
            hit_rate: if lookups > 0 {
                inner.hits as f64 / lookups as f64
            } else {
                0.0
            },
            total_hits: inner.hits,
            total_misses: inner.misses,
            total_size_bytes: inner.map.values().map(|e| e.size_bytes).sum(),
            ttl_hours: self.default_ttl.as_secs_f64() / 3600.0,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cache-aside helper: derive the fingerprint for the call, return
    /// the cached value on a hit, otherwise run `compute` and cache its
    /// successful result. This replaces the decorator mechanism of a
    /// dynamic language while preserving the wrap-any-function
    /// ergonomics.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        identity: &str,
        args: &[serde_json::Value],
        kwargs: &[(String, serde_json::Value)],
        ttl_override: Option<Duration>,
        compute: F,
    ) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<String, E>>,
    {
        let key = Self::fingerprint(identity, args, kwargs);
        if let Some(cached) = self.get(&key).await {
            debug!("Cache hit for '{}'", identity);
            return Ok(cached);
        }
        let start = Instant::now();
        let value = compute().await?;
        debug!(
            "Computed '{}' in {:.3}s and cached",
            identity,
            start.elapsed().as_secs_f64()
        );
        self.put_with_ttl(&key, value.clone(), ttl_override.unwrap_or(self.default_ttl))
            .await;
        Ok(value)
    }
}
