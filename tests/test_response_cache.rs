// ================================================================================================
// RESPONSE CACHE TEST SUITE
// ================================================================================================
//
// Validates the TTL + LRU response cache that keeps repeat requests off
// the inference path on memory-constrained devices:
// - TTL expiry: entries become misses once their age exceeds the TTL,
//   even if never explicitly purged
// - LRU bound: the cache never holds more than its configured capacity
// - Deterministic fingerprints: keyword-argument order never changes
//   the cache key
// - Counters: hit/miss accounting feeds the runtime's metrics surface

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use edge_llm_runtime::ResponseCache;
use serde_json::json;

#[cfg(test)]
mod ttl_tests {
    use super::*;

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let cache = ResponseCache::new(16, Duration::from_millis(150));
        cache.put("k", "v".to_string()).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats_before = cache.stats().await;
        assert_eq!(cache.get("k").await, None);
        let stats_after = cache.stats().await;
        assert_eq!(stats_after.total_misses, stats_before.total_misses + 1);
        assert_eq!(stats_after.entries, 0, "expired entry is evicted lazily on lookup");
    }

    #[tokio::test]
    async fn per_entry_ttl_override_is_honored() {
        let cache = ResponseCache::new(16, Duration::from_secs(3600));
        cache
            .put_with_ttl("short", "v".to_string(), Duration::from_millis(50))
            .await;
        cache.put("long", "v".to_string()).await;

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(cache.get("short").await, None);
        assert_eq!(cache.get("long").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn cleanup_expired_sweeps_only_stale_entries() {
        let cache = ResponseCache::new(16, Duration::from_secs(3600));
        cache
            .put_with_ttl("stale-1", "v".to_string(), Duration::from_millis(10))
            .await;
        cache
            .put_with_ttl("stale-2", "v".to_string(), Duration::from_millis(10))
            .await;
        cache.put("fresh", "v".to_string()).await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.cleanup_expired().await, 2);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("fresh").await.as_deref(), Some("v"));
    }
}

#[cfg(test)]
mod lru_tests {
    use super::*;

    #[tokio::test]
    async fn capacity_plus_one_inserts_evict_first_inserted() {
        let cache = ResponseCache::new(3, Duration::from_secs(3600));
        for i in 0..4 {
            cache.put(&format!("k{i}"), format!("v{i}")).await;
        }

        assert_eq!(cache.len().await, 3);
        assert_eq!(cache.get("k0").await, None, "first-inserted key must be gone");
        for i in 1..4 {
            assert!(cache.get(&format!("k{i}")).await.is_some());
        }
    }

    #[tokio::test]
    async fn recent_read_protects_entry_from_eviction() {
        let cache = ResponseCache::new(3, Duration::from_secs(3600));
        cache.put("a", "1".to_string()).await;
        cache.put("b", "2".to_string()).await;
        cache.put("c", "3".to_string()).await;

        // Touch "a" so "b" becomes least recently used.
        assert!(cache.get("a").await.is_some());
        cache.put("d", "4".to_string()).await;

        assert_eq!(cache.get("b").await, None);
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("c").await.is_some());
        assert!(cache.get("d").await.is_some());
    }

    #[tokio::test]
    async fn overwriting_existing_key_does_not_evict() {
        let cache = ResponseCache::new(2, Duration::from_secs(3600));
        cache.put("a", "1".to_string()).await;
        cache.put("b", "2".to_string()).await;
        cache.put("a", "updated".to_string()).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("a").await.as_deref(), Some("updated"));
        assert!(cache.get("b").await.is_some());
    }
}

#[cfg(test)]
mod fingerprint_tests {
    use super::*;

    #[test]
    fn kwargs_order_is_irrelevant() {
        let a = ResponseCache::fingerprint(
            "f",
            &[],
            &[("a".to_string(), json!(1)), ("b".to_string(), json!(2))],
        );
        let b = ResponseCache::fingerprint(
            "f",
            &[],
            &[("b".to_string(), json!(2)), ("a".to_string(), json!(1))],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_is_stable_across_calls() {
        let args = [json!("dns filtering"), json!(42)];
        let first = ResponseCache::fingerprint("advice", &args, &[]);
        for _ in 0..10 {
            assert_eq!(first, ResponseCache::fingerprint("advice", &args, &[]));
        }
    }
}

#[cfg(test)]
mod accounting_tests {
    use super::*;

    #[tokio::test]
    async fn clear_returns_removed_count() {
        let cache = ResponseCache::new(16, Duration::from_secs(3600));
        for i in 0..5 {
            cache.put(&format!("k{i}"), "v".to_string()).await;
        }
        assert_eq!(cache.clear().await, 5);
        assert!(cache.is_empty().await);
        assert_eq!(cache.clear().await, 0);
    }

    #[tokio::test]
    async fn hit_rate_reflects_lookups() {
        let cache = ResponseCache::new(16, Duration::from_secs(3600));
        cache.put("k", "v".to_string()).await;

        assert!(cache.get("k").await.is_some());
        assert!(cache.get("k").await.is_some());
        assert!(cache.get("missing").await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.total_hits, 2);
        assert_eq!(stats.total_misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.total_size_bytes, 1);
    }

    #[tokio::test]
    async fn get_or_compute_runs_compute_only_on_miss() {
        let cache = ResponseCache::new(16, Duration::from_secs(3600));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result: Result<String, std::convert::Infallible> = cache
                .get_or_compute("advice", &[json!("wifi")], &[], None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("use WPA3".to_string())
                })
                .await;
            assert_eq!(result.unwrap(), "use WPA3");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1, "compute must run exactly once");
    }

    #[tokio::test]
    async fn failed_compute_is_not_cached() {
        let cache = ResponseCache::new(16, Duration::from_secs(3600));
        let calls = AtomicUsize::new(0);

        let failed: Result<String, &str> = cache
            .get_or_compute("flaky", &[], &[], None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("backend down")
            })
            .await;
        assert!(failed.is_err());

        let recovered: Result<String, &str> = cache
            .get_or_compute("flaky", &[], &[], None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("recovered".to_string())
            })
            .await;
        assert_eq!(recovered.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
