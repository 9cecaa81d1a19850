//! The namespaced cache facade.
//!
//! Thin layer over a backend provider: backend selection at construction,
//! per-namespace statistics around every call, and nothing else. All routing
//! and network behavior lives in the memcache subsystem.

use crate::config::{CacheConfig, CacheKind};
use crate::error::{Error, OpOutcome, Result};
use crate::memcache::{ClusterManager, Connector, MemcacheProvider, TcpConnector};
use crate::provider::{InProcessProvider, InternalCacheProvider, NoopProvider};
use crate::stats::{OpKind, StatsRegistry, StatsSnapshot};
use crate::topology::{
    DiscoveryTopologySource, ServiceDiscovery, StaticTopologySource, TopologySource,
};
use crate::types::CacheEntry;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// A configured cache instance.
///
/// Construct one per logical cache; each memcache-backed instance owns its
/// own cluster manager, so there is no process-wide shared client.
pub struct Cache {
    provider: Arc<dyn InternalCacheProvider>,
    stats: Arc<StatsRegistry>,
    manager: Option<Arc<ClusterManager>>,
    kind: CacheKind,
}

impl Cache {
    /// Create a cache from configuration alone.
    ///
    /// The memcache kind requires a static server list in the configuration;
    /// use [`with_discovery`](Self::with_discovery) to resolve servers
    /// dynamically instead.
    pub async fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        match config.kind {
            CacheKind::Memcache if config.servers.is_empty() => Err(Error::Config(
                "memcache backend needs server uris or a discovery collaborator".into(),
            )),
            CacheKind::Memcache => {
                let source = Arc::new(StaticTopologySource::new(&config.servers));
                Self::build_memcache(config, source).await
            }
            _ => Self::build_local(config),
        }
    }

    /// Create a cache whose topology comes from service discovery. Static
    /// server URIs, when configured, still take precedence.
    pub async fn with_discovery(
        config: CacheConfig,
        discovery: Arc<dyn ServiceDiscovery>,
    ) -> Result<Self> {
        config.validate()?;
        if config.kind != CacheKind::Memcache {
            return Self::build_local(config);
        }
        if !config.servers.is_empty() {
            let source = Arc::new(StaticTopologySource::new(&config.servers));
            return Self::build_memcache(config, source).await;
        }
        let mut source = DiscoveryTopologySource::new(discovery, config.service_name.clone());
        if let Some(shard) = &config.shard {
            source = source.with_shard(shard.clone());
        }
        Self::build_memcache(config, Arc::new(source)).await
    }

    /// Create a memcache-backed cache from an explicit topology source and
    /// connector. This is the seam integration tests use; production callers
    /// normally go through [`new`](Self::new) or
    /// [`with_discovery`](Self::with_discovery).
    pub async fn with_topology_source(
        config: CacheConfig,
        source: Arc<dyn TopologySource>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate()?;
        if config.kind != CacheKind::Memcache {
            return Self::build_local(config);
        }
        let manager = ClusterManager::new(source, connector, config.clone());
        manager.start().await?;
        let provider = MemcacheProvider::new(manager.clone(), &config);
        Ok(Self {
            provider: Arc::new(provider),
            stats: Arc::new(StatsRegistry::new()),
            manager: Some(manager),
            kind: config.kind,
        })
    }

    async fn build_memcache(config: CacheConfig, source: Arc<dyn TopologySource>) -> Result<Self> {
        let connector: Arc<dyn Connector> =
            Arc::new(TcpConnector::new(config.operation_timeout));
        Self::with_topology_source(config, source, connector).await
    }

    fn build_local(config: CacheConfig) -> Result<Self> {
        let provider: Arc<dyn InternalCacheProvider> = match config.kind {
            CacheKind::None => Arc::new(NoopProvider),
            CacheKind::InProcess => Arc::new(InProcessProvider::new(&config)),
            CacheKind::InProcessNoEviction => Arc::new(InProcessProvider::unbounded(&config)),
            CacheKind::Memcache => unreachable!("memcache handled by the caller"),
        };
        info!(kind = ?config.kind, "cache configured");
        Ok(Self {
            provider,
            stats: Arc::new(StatsRegistry::new()),
            manager: None,
            kind: config.kind,
        })
    }

    /// The configured backend kind.
    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// The cluster manager, when the memcache backend is active. Exposes the
    /// generation counter for tests and diagnostics.
    pub fn cluster(&self) -> Option<&Arc<ClusterManager>> {
        self.manager.as_ref()
    }

    /// Store every entry under the namespace.
    pub async fn set(
        &self,
        namespace: &str,
        entries: Vec<CacheEntry>,
    ) -> HashMap<String, OpOutcome> {
        let stats = self.stats.for_namespace(namespace);
        stats.record_stores(entries.len() as u64);
        let start = Instant::now();
        let outcomes = self.provider.set(namespace, entries, &stats).await;
        stats.record_elapsed(OpKind::Set, start.elapsed());
        outcomes
    }

    /// Store entries only where the key is absent. Whether `true` is ever
    /// reported depends on the backend's capability (see
    /// [`InternalCacheProvider::add`]).
    pub async fn add(
        &self,
        namespace: &str,
        entries: Vec<CacheEntry>,
    ) -> HashMap<String, bool> {
        let stats = self.stats.for_namespace(namespace);
        stats.record_stores(entries.len() as u64);
        let start = Instant::now();
        let added = self.provider.add(namespace, entries, &stats).await;
        stats.record_elapsed(OpKind::Add, start.elapsed());
        added
    }

    /// Fetch values for the keys. Keys absent from the map are misses.
    pub async fn get(
        &self,
        namespace: &str,
        keys: &[String],
    ) -> Result<HashMap<String, Bytes>> {
        let stats = self.stats.for_namespace(namespace);
        stats.record_fetches(keys.len() as u64);
        let start = Instant::now();
        let results = self.provider.get(namespace, keys, &stats).await;
        stats.record_elapsed(OpKind::Get, start.elapsed());
        if let Ok(found) = &results {
            stats.record_hits(found.len() as u64);
        }
        results
    }

    /// Delete the keys from the namespace.
    pub async fn clear(
        &self,
        namespace: &str,
        keys: &[String],
    ) -> HashMap<String, OpOutcome> {
        let stats = self.stats.for_namespace(namespace);
        stats.record_clears(keys.len() as u64);
        let start = Instant::now();
        let outcomes = self.provider.clear(namespace, keys, &stats).await;
        stats.record_elapsed(OpKind::Clear, start.elapsed());
        outcomes
    }

    /// Snapshot one namespace's statistics.
    pub fn statistics(&self, namespace: &str) -> StatsSnapshot {
        self.stats.for_namespace(namespace).snapshot()
    }

    /// The statistics registry, for metrics exporters.
    pub fn statistics_registry(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    /// Stop background work and release backend resources.
    pub async fn shutdown(&self) {
        self.provider.shutdown().await;
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("kind", &self.kind)
            .field("namespaces", &self.stats.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_kind_is_noop() {
        let cache = Cache::new(CacheConfig::default()).await.unwrap();
        assert_eq!(cache.kind(), CacheKind::None);
        assert!(cache.cluster().is_none());

        cache.set("ns", vec![CacheEntry::new("k", "v")]).await;
        let results = cache.get("ns", &["k".to_string()]).await.unwrap();
        assert!(results.is_empty());

        let snapshot = cache.statistics("ns");
        assert_eq!(snapshot.stores, 1);
        assert_eq!(snapshot.fetches, 1);
        assert_eq!(snapshot.hits, 0);
    }

    #[tokio::test]
    async fn test_memcache_without_servers_or_discovery_is_fatal() {
        let config = CacheConfig::new(CacheKind::Memcache);
        assert!(matches!(Cache::new(config).await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_in_process_via_facade_counts_stats() {
        let cache = Cache::new(CacheConfig::new(CacheKind::InProcess))
            .await
            .unwrap();

        cache
            .set(
                "users",
                vec![CacheEntry::new("a", "1"), CacheEntry::new("b", "2")],
            )
            .await;
        let results = cache
            .get("users", &["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);

        let snapshot = cache.statistics("users");
        assert_eq!(snapshot.stores, 2);
        assert_eq!(snapshot.fetches, 3);
        assert_eq!(snapshot.hits, 2);
        assert!(snapshot.get_elapsed > std::time::Duration::ZERO);

        cache.clear("users", &["a".to_string()]).await;
        assert_eq!(cache.statistics("users").clears, 1);
    }
}
