//! Backend capability contract and the non-distributed backends.
//!
//! Every backend satisfies [`InternalCacheProvider`]; the facade selects one
//! variant at construction time and never revisits the choice per call.

use crate::config::CacheConfig;
use crate::error::{OpOutcome, Result};
use crate::stats::CacheStatistics;
use crate::types::CacheEntry;
use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache as MokaCache;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::trace;

/// Capability contract every cache backend must satisfy.
///
/// `add` is optional-support: backends that cannot express "store only if
/// absent" report `false` for every key. This is a documented capability
/// gap, not an error.
#[async_trait]
pub trait InternalCacheProvider: Send + Sync {
    /// Store every entry. Per-key outcomes; the batch never aborts early.
    async fn set(
        &self,
        namespace: &str,
        entries: Vec<CacheEntry>,
        stats: &CacheStatistics,
    ) -> HashMap<String, OpOutcome>;

    /// Store entries only where the key is absent. `true` means the entry
    /// won the slot.
    async fn add(
        &self,
        namespace: &str,
        entries: Vec<CacheEntry>,
        stats: &CacheStatistics,
    ) -> HashMap<String, bool>;

    /// Fetch values for the keys. A key absent from the map is a miss; the
    /// map itself is never absent.
    async fn get(
        &self,
        namespace: &str,
        keys: &[String],
        stats: &CacheStatistics,
    ) -> Result<HashMap<String, Bytes>>;

    /// Delete the keys. Per-key outcomes, same tolerance as `set`.
    async fn clear(
        &self,
        namespace: &str,
        keys: &[String],
        stats: &CacheStatistics,
    ) -> HashMap<String, OpOutcome>;

    /// Release backend resources. Default: nothing to release.
    async fn shutdown(&self) {}
}

/// Backend that accepts all writes silently and returns no results ever.
#[derive(Debug, Default)]
pub struct NoopProvider;

#[async_trait]
impl InternalCacheProvider for NoopProvider {
    async fn set(
        &self,
        _namespace: &str,
        _entries: Vec<CacheEntry>,
        _stats: &CacheStatistics,
    ) -> HashMap<String, OpOutcome> {
        HashMap::new()
    }

    async fn add(
        &self,
        _namespace: &str,
        entries: Vec<CacheEntry>,
        _stats: &CacheStatistics,
    ) -> HashMap<String, bool> {
        // Cannot express "only if absent": everything reports false.
        entries
            .into_iter()
            .map(|entry| (entry.key().to_string(), false))
            .collect()
    }

    async fn get(
        &self,
        _namespace: &str,
        _keys: &[String],
        _stats: &CacheStatistics,
    ) -> Result<HashMap<String, Bytes>> {
        Ok(HashMap::new())
    }

    async fn clear(
        &self,
        _namespace: &str,
        _keys: &[String],
        _stats: &CacheStatistics,
    ) -> HashMap<String, OpOutcome> {
        HashMap::new()
    }
}

/// In-process backend keyed by `(namespace, key)`.
///
/// Eviction is delegated to moka; the no-eviction variant simply gets an
/// unbounded cache. Advisory expiry is tracked alongside and checked at read
/// time, matching the distributed backend's best-effort semantics.
pub struct InProcessProvider {
    cache: MokaCache<(String, String), Bytes>,
    expirations: RwLock<HashMap<(String, String), SystemTime>>,
    max_value_size: usize,
}

impl InProcessProvider {
    /// Bounded, evicting variant.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_cache(
            MokaCache::builder()
                .max_capacity(config.in_process_capacity)
                .build(),
            config,
        )
    }

    /// Unbounded variant for the no-eviction cache kind.
    pub fn unbounded(config: &CacheConfig) -> Self {
        Self::with_cache(MokaCache::builder().build(), config)
    }

    fn with_cache(cache: MokaCache<(String, String), Bytes>, config: &CacheConfig) -> Self {
        Self {
            cache,
            expirations: RwLock::new(HashMap::new()),
            max_value_size: config.max_value_size,
        }
    }

    fn oversized(&self, entry: &CacheEntry) -> bool {
        self.max_value_size > 0 && entry.data_len() > self.max_value_size
    }

    fn expired(&self, slot: &(String, String)) -> bool {
        self.expirations
            .read()
            .get(slot)
            .is_some_and(|at| *at <= SystemTime::now())
    }

    async fn insert(&self, slot: (String, String), entry: CacheEntry) {
        match entry.expiry() {
            Some(at) => {
                self.expirations.write().insert(slot.clone(), at);
            }
            None => {
                self.expirations.write().remove(&slot);
            }
        }
        let value = entry.data().cloned().unwrap_or_else(Bytes::new);
        self.cache.insert(slot, value).await;
    }

    async fn evict(&self, slot: &(String, String)) {
        self.cache.invalidate(slot).await;
        self.expirations.write().remove(slot);
    }
}

#[async_trait]
impl InternalCacheProvider for InProcessProvider {
    async fn set(
        &self,
        namespace: &str,
        entries: Vec<CacheEntry>,
        stats: &CacheStatistics,
    ) -> HashMap<String, OpOutcome> {
        let mut outcomes = HashMap::with_capacity(entries.len());
        for entry in entries {
            if self.oversized(&entry) {
                stats.record_oversized(1);
                outcomes.insert(entry.key().to_string(), OpOutcome::Oversized);
                continue;
            }
            let slot = (namespace.to_string(), entry.key().to_string());
            let key = entry.key().to_string();
            self.insert(slot, entry).await;
            outcomes.insert(key, OpOutcome::Stored);
        }
        outcomes
    }

    async fn add(
        &self,
        namespace: &str,
        entries: Vec<CacheEntry>,
        stats: &CacheStatistics,
    ) -> HashMap<String, bool> {
        let mut added = HashMap::with_capacity(entries.len());
        for entry in entries {
            if self.oversized(&entry) {
                stats.record_oversized(1);
                added.insert(entry.key().to_string(), false);
                continue;
            }
            let slot = (namespace.to_string(), entry.key().to_string());
            let occupied = self.cache.contains_key(&slot) && !self.expired(&slot);
            let key = entry.key().to_string();
            if occupied {
                trace!(namespace, key = %key, "add lost to existing entry");
                added.insert(key, false);
            } else {
                self.insert(slot, entry).await;
                added.insert(key, true);
            }
        }
        added
    }

    async fn get(
        &self,
        namespace: &str,
        keys: &[String],
        _stats: &CacheStatistics,
    ) -> Result<HashMap<String, Bytes>> {
        let mut results = HashMap::new();
        for key in keys {
            let slot = (namespace.to_string(), key.clone());
            if self.expired(&slot) {
                self.evict(&slot).await;
                continue;
            }
            if let Some(value) = self.cache.get(&slot).await {
                results.insert(key.clone(), value);
            }
        }
        Ok(results)
    }

    async fn clear(
        &self,
        namespace: &str,
        keys: &[String],
        _stats: &CacheStatistics,
    ) -> HashMap<String, OpOutcome> {
        let mut outcomes = HashMap::with_capacity(keys.len());
        for key in keys {
            let slot = (namespace.to_string(), key.clone());
            self.evict(&slot).await;
            outcomes.insert(key.clone(), OpOutcome::Stored);
        }
        outcomes
    }
}

impl std::fmt::Debug for InProcessProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessProvider")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use std::time::Duration;

    fn stats() -> CacheStatistics {
        CacheStatistics::default()
    }

    #[tokio::test]
    async fn test_noop_swallows_everything() {
        let provider = NoopProvider;
        let stats = stats();

        let outcomes = provider
            .set("ns", vec![CacheEntry::new("k", "v")], &stats)
            .await;
        assert!(outcomes.is_empty());

        let added = provider
            .add("ns", vec![CacheEntry::new("k", "v")], &stats)
            .await;
        assert_eq!(added.get("k"), Some(&false));

        let results = provider
            .get("ns", &["k".to_string()], &stats)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_in_process_roundtrip_and_isolation() {
        let config = CacheConfig::default();
        let provider = InProcessProvider::new(&config);
        let stats = stats();

        provider
            .set("ns1", vec![CacheEntry::new("k", "v1")], &stats)
            .await;
        provider
            .set("ns2", vec![CacheEntry::new("k", "v2")], &stats)
            .await;

        let ns1 = provider
            .get("ns1", &["k".to_string()], &stats)
            .await
            .unwrap();
        assert_eq!(ns1["k"], Bytes::from_static(b"v1"));

        let ns2 = provider
            .get("ns2", &["k".to_string()], &stats)
            .await
            .unwrap();
        assert_eq!(ns2["k"], Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn test_in_process_add_is_first_writer_wins() {
        let config = CacheConfig::default();
        let provider = InProcessProvider::new(&config);
        let stats = stats();

        let first = provider
            .add("ns", vec![CacheEntry::new("k", "v1")], &stats)
            .await;
        assert_eq!(first.get("k"), Some(&true));

        let second = provider
            .add("ns", vec![CacheEntry::new("k", "v2")], &stats)
            .await;
        assert_eq!(second.get("k"), Some(&false));

        let results = provider
            .get("ns", &["k".to_string()], &stats)
            .await
            .unwrap();
        assert_eq!(results["k"], Bytes::from_static(b"v1"));
    }

    #[tokio::test]
    async fn test_in_process_advisory_expiry() {
        let config = CacheConfig::default();
        let provider = InProcessProvider::new(&config);
        let stats = stats();

        let entry = CacheEntry::expiring_in("k", "v", Duration::from_millis(30));
        provider.set("ns", vec![entry], &stats).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let results = provider
            .get("ns", &["k".to_string()], &stats)
            .await
            .unwrap();
        assert!(!results.contains_key("k"));

        // The slot is free again for add.
        let added = provider
            .add("ns", vec![CacheEntry::new("k", "v2")], &stats)
            .await;
        assert_eq!(added.get("k"), Some(&true));
    }

    #[tokio::test]
    async fn test_in_process_clear_and_oversized() {
        let config = CacheConfig::default().with_max_value_size(2);
        let provider = InProcessProvider::new(&config);
        let stats = stats();

        let outcomes = provider
            .set(
                "ns",
                vec![CacheEntry::new("small", "ok"), CacheEntry::new("big", "nope")],
                &stats,
            )
            .await;
        assert_eq!(outcomes["small"], OpOutcome::Stored);
        assert_eq!(outcomes["big"], OpOutcome::Oversized);
        assert_eq!(stats.oversized(), 1);

        provider.clear("ns", &["small".to_string()], &stats).await;
        let results = provider
            .get("ns", &["small".to_string()], &stats)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
