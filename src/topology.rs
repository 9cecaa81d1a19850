//! Topology sources: where the set of memcached servers comes from.
//!
//! A [`TopologySource`] resolves the current [`ClusterTopology`]. Two
//! strategies are provided, selected at construction:
//!
//! - [`StaticTopologySource`] parses a fixed list of `memcache://host:port`
//!   URIs once and returns the same set forever.
//! - [`DiscoveryTopologySource`] queries a [`ServiceDiscovery`] collaborator
//!   for every instance advertising the well-known service name, optionally
//!   filtered to a named shard/tenant.
//!
//! An empty resolution is not a fault: it means "no cache available" and the
//! cluster manager retires the live client until servers reappear.

use crate::config::MEMCACHE_SCHEME;
use crate::error::Result;
use crate::types::{ClusterTopology, Endpoint};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Resolves the current set of memcached server addresses.
#[async_trait]
pub trait TopologySource: Send + Sync {
    /// Resolve the current topology. An empty topology means "no cache
    /// available", not an error.
    async fn resolve(&self) -> Result<ClusterTopology>;
}

/// One instance advertised by the service discovery collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Advertised host.
    pub host: String,
    /// Advertised port.
    pub port: u16,
    /// Advertised service type (e.g. `"memcached"`).
    pub service_type: String,
    /// Optional shard/tenant the instance serves.
    pub shard: Option<String>,
}

impl ServiceInstance {
    /// Create an instance record.
    pub fn new(host: impl Into<String>, port: u16, service_type: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            service_type: service_type.into(),
            shard: None,
        }
    }

    /// Tag the instance with a shard name.
    pub fn with_shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }
}

/// Service discovery collaborator contract.
///
/// Implemented outside this crate by whatever registry the deployment uses
/// (ZooKeeper, Consul, a sidecar, ...).
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// All instances currently advertising `service_name`.
    async fn find_instances(&self, service_name: &str) -> Result<Vec<ServiceInstance>>;
}

/// Fixed topology parsed once from configured URIs.
#[derive(Debug, Clone)]
pub struct StaticTopologySource {
    topology: ClusterTopology,
}

impl StaticTopologySource {
    /// Parse the configured URI list. URIs with a non-matching scheme or an
    /// unparseable address are skipped with a warning, never fatal.
    pub fn new(uris: &[String]) -> Self {
        let mut endpoints = Vec::new();
        for uri in uris {
            match parse_server_uri(uri) {
                Some(endpoint) => endpoints.push(endpoint),
                None => warn!(uri = %uri, "skipping unrecognized cache server uri"),
            }
        }
        Self {
            topology: ClusterTopology::from_endpoints(endpoints),
        }
    }
}

#[async_trait]
impl TopologySource for StaticTopologySource {
    async fn resolve(&self) -> Result<ClusterTopology> {
        Ok(self.topology.clone())
    }
}

/// Parse a `memcache://host:port` URI. Returns `None` for any other scheme
/// or a malformed address.
fn parse_server_uri(uri: &str) -> Option<Endpoint> {
    let rest = uri.strip_prefix(MEMCACHE_SCHEME)?.strip_prefix("://")?;
    rest.parse().ok()
}

/// Topology resolved from service discovery on every poll.
pub struct DiscoveryTopologySource {
    discovery: Arc<dyn ServiceDiscovery>,
    service_name: String,
    shard: Option<String>,
}

impl DiscoveryTopologySource {
    /// Create a discovery-backed source for the given service name.
    pub fn new(discovery: Arc<dyn ServiceDiscovery>, service_name: impl Into<String>) -> Self {
        Self {
            discovery,
            service_name: service_name.into(),
            shard: None,
        }
    }

    /// Restrict resolution to instances advertising the given shard.
    pub fn with_shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }
}

#[async_trait]
impl TopologySource for DiscoveryTopologySource {
    async fn resolve(&self) -> Result<ClusterTopology> {
        let instances = self.discovery.find_instances(&self.service_name).await?;
        let endpoints = instances
            .into_iter()
            .filter(|instance| instance.service_type == self.service_name)
            .filter(|instance| match &self.shard {
                Some(shard) => instance.shard.as_deref() == Some(shard.as_str()),
                None => true,
            })
            .map(|instance| Endpoint::new(instance.host, instance.port));
        Ok(ClusterTopology::from_endpoints(endpoints))
    }
}

impl std::fmt::Debug for DiscoveryTopologySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryTopologySource")
            .field("service_name", &self.service_name)
            .field("shard", &self.shard)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_static_source_parses_matching_uris() {
        let source = StaticTopologySource::new(&[
            "memcache://10.0.0.1:11211".to_string(),
            "memcache://10.0.0.2:11211".to_string(),
        ]);
        let topology = source.resolve().await.unwrap();
        assert_eq!(topology.len(), 2);
        assert!(topology.contains(&Endpoint::new("10.0.0.1", 11211)));

        // Same set on every resolve.
        assert_eq!(source.resolve().await.unwrap(), topology);
    }

    #[tokio::test]
    async fn test_static_source_skips_foreign_schemes() {
        let source = StaticTopologySource::new(&[
            "memcache://10.0.0.1:11211".to_string(),
            "redis://10.0.0.2:6379".to_string(),
            "memcache://not-an-endpoint".to_string(),
        ]);
        let topology = source.resolve().await.unwrap();
        assert_eq!(topology.len(), 1);
    }

    struct ListedDiscovery {
        instances: Mutex<Vec<ServiceInstance>>,
    }

    #[async_trait]
    impl ServiceDiscovery for ListedDiscovery {
        async fn find_instances(&self, _service_name: &str) -> Result<Vec<ServiceInstance>> {
            Ok(self.instances.lock().clone())
        }
    }

    #[tokio::test]
    async fn test_discovery_source_translates_instances() {
        let discovery = Arc::new(ListedDiscovery {
            instances: Mutex::new(vec![
                ServiceInstance::new("cache-1", 11211, "memcached"),
                ServiceInstance::new("cache-2", 11211, "memcached"),
                ServiceInstance::new("web-1", 8080, "http"),
            ]),
        });

        let source = DiscoveryTopologySource::new(discovery, "memcached");
        let topology = source.resolve().await.unwrap();
        assert_eq!(topology.len(), 2);
        assert!(!topology.contains(&Endpoint::new("web-1", 8080)));
    }

    #[tokio::test]
    async fn test_discovery_source_filters_by_shard() {
        let discovery = Arc::new(ListedDiscovery {
            instances: Mutex::new(vec![
                ServiceInstance::new("cache-1", 11211, "memcached").with_shard("tenant-a"),
                ServiceInstance::new("cache-2", 11211, "memcached").with_shard("tenant-b"),
                ServiceInstance::new("cache-3", 11211, "memcached"),
            ]),
        });

        let source = DiscoveryTopologySource::new(discovery, "memcached").with_shard("tenant-a");
        let topology = source.resolve().await.unwrap();
        assert_eq!(topology.len(), 1);
        assert!(topology.contains(&Endpoint::new("cache-1", 11211)));
    }

    #[tokio::test]
    async fn test_discovery_source_empty_is_not_an_error() {
        let discovery = Arc::new(ListedDiscovery {
            instances: Mutex::new(Vec::new()),
        });

        let source = DiscoveryTopologySource::new(discovery, "memcached");
        let topology = source.resolve().await.unwrap();
        assert!(topology.is_empty());
    }
}
