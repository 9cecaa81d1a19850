//! Provider-neutral namespaced caching client.
//!
//! This crate gives application code a uniform namespaced key/value cache
//! interface and routes operations to one of several backends selected at
//! configuration time:
//!
//! - a no-op sink (the default),
//! - an in-process eviction cache backed by Moka,
//! - a sharded external memcached cluster whose membership is discovered
//!   dynamically and routed per-key with a Ketama consistent-hash ring.
//!
//! # Example
//!
//! ```rust,no_run
//! use cachefront::{Cache, CacheConfig, CacheEntry, CacheKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::new(CacheKind::Memcache)
//!         .with_servers(vec![
//!             "memcache://10.0.0.1:11211".into(),
//!             "memcache://10.0.0.2:11211".into(),
//!         ])
//!         .with_synchronous(true);
//!
//!     let cache = Cache::new(config).await?;
//!
//!     cache
//!         .set("users", vec![CacheEntry::new("alice", "payload")])
//!         .await;
//!
//!     let found = cache.get("users", &["alice".to_string()]).await?;
//!     println!("alice -> {:?}", found.get("alice"));
//!
//!     cache.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             Application Layer               │
//! └─────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │          Cache (namespaces, stats)          │
//! └─────────────────────────────────────────────┘
//!                      │
//!        ┌─────────────┼─────────────┐
//!        ▼             ▼             ▼
//! ┌───────────┐  ┌───────────┐  ┌───────────────┐
//! │   Noop    │  │ InProcess │  │   Memcache    │
//! │ provider  │  │  (Moka)   │  │   pipeline    │
//! └───────────┘  └───────────┘  └───────────────┘
//!                                       │
//!                                       ▼
//!                          ┌─────────────────────────┐
//!                          │ ClusterManager          │
//!                          │  rediscovery, swap,     │
//!                          │  generation counter     │
//!                          └─────────────────────────┘
//!                                       │
//!                                       ▼
//!                          ┌─────────────────────────┐
//!                          │ ClusterClient           │
//!                          │  Ketama ring routing,   │
//!                          │  per-node connections   │
//!                          └─────────────────────────┘
//! ```
//!
//! # Consistency model
//!
//! Entries are best-effort and advisory-expiring: the cache may return
//! nothing for a stored key and never guarantees cross-key ordering. Writes
//! in asynchronous mode (the default) are fire-and-forget; reads always wait
//! for the bulk fetch. Network faults degrade to misses and unconfirmed
//! writes; they never surface as errors to callers.

pub mod cache;
pub mod config;
pub mod error;
pub mod memcache;
pub mod provider;
pub mod routing;
pub mod stats;
pub mod testing;
pub mod topology;
pub mod types;

// Re-export main types for convenience
pub use cache::Cache;
pub use config::{CacheConfig, CacheKind, FailureMode, KeyEncoding, MEMCACHE_SCHEME};
pub use error::{ConnectionError, Error, OpOutcome, Result, TopologyError};
pub use types::{CacheEntry, ClusterTopology, Endpoint};

// Re-export the backend contract and backends
pub use provider::{InProcessProvider, InternalCacheProvider, NoopProvider};

// Re-export the memcache subsystem surface
pub use memcache::{
    AsciiConnection, ClusterClient, ClusterManager, Connector, ManagerState, MemcacheProvider,
    NodeConnection, TcpConnector,
};

// Re-export routing types
pub use routing::{KetamaRing, RingRouter, MAX_SEQUENCE_NODES, RING_REPETITIONS};

// Re-export topology types
pub use topology::{
    DiscoveryTopologySource, ServiceDiscovery, ServiceInstance, StaticTopologySource,
    TopologySource,
};

// Re-export statistics types
pub use stats::{CacheStatistics, OpKind, StatsRegistry, StatsSnapshot};
