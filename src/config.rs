//! Configuration types for the caching client.

use crate::error::{Error, Result};
use std::time::Duration;

/// URI scheme recognized by the static topology source.
pub const MEMCACHE_SCHEME: &str = "memcache";

/// Which backend a configured cache routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheKind {
    /// Accept all writes silently, return no results ever.
    #[default]
    None,
    /// In-process cache with bounded capacity and eviction.
    InProcess,
    /// In-process cache without eviction (unbounded).
    InProcessNoEviction,
    /// Sharded external memcached cluster.
    Memcache,
}

/// How namespace and key are encoded before hitting the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyEncoding {
    /// Keys pass through untouched. Callers must stay within the memcached
    /// key alphabet themselves.
    None,
    /// URL-safe unpadded base64. Byte-safe and reversible.
    #[default]
    Base64,
}

/// How the network client reacts to a node that stops responding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Cancel outstanding operations against the node.
    #[default]
    Cancel,
    /// Accepted for compatibility with existing configuration; the bundled
    /// client never retries on its own and treats this as [`Cancel`].
    ///
    /// [`Cancel`]: FailureMode::Cancel
    Retry,
}

/// Main configuration for a cache instance.
///
/// Validated once at construction; a malformed configuration is fatal, not
/// recoverable.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Which backend to use.
    pub kind: CacheKind,

    /// Static server URI list (`memcache://host:port`). When non-empty this
    /// overrides service discovery.
    pub servers: Vec<String>,

    /// Well-known service name queried against service discovery when no
    /// static servers are configured.
    pub service_name: String,

    /// Optional shard/tenant name to filter discovered instances.
    pub shard: Option<String>,

    /// Polling period for topology refresh.
    pub rediscovery_interval: Duration,

    /// Whether `set`/`add`/`clear` block until the network operation
    /// completes. Reads always block.
    pub synchronous: bool,

    /// Key/namespace encoding.
    pub encoding: KeyEncoding,

    /// Byte sequence joining the encoded namespace and key.
    pub separator: Vec<u8>,

    /// Maximum payload size in bytes; 0 means unlimited.
    pub max_value_size: usize,

    /// Bound on concurrent reads per server connection.
    pub read_queue_size: usize,

    /// Bound on concurrent writes per server connection.
    pub write_queue_size: usize,

    /// Incoming queue depth, passed through to protocol clients that use
    /// one. The bundled ASCII adapter has no incoming queue and ignores it.
    pub incoming_queue_size: usize,

    /// How long a dispatched operation may run before it is treated as a
    /// miss (read) or unconfirmed (write).
    pub operation_timeout: Duration,

    /// How long an operation may wait for a queue slot before it is dropped
    /// as `QueueFull`.
    pub enqueue_timeout: Duration,

    /// Reaction to an unresponsive node.
    pub failure_mode: FailureMode,

    /// Grace period granted to a superseded client to flush in-flight
    /// operations before it is force-closed.
    pub shutdown_grace: Duration,

    /// In-process backend capacity (entries). Ignored by other backends.
    pub in_process_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheKind::None,
            servers: Vec::new(),
            service_name: "memcached".to_string(),
            shard: None,
            rediscovery_interval: Duration::from_millis(1000),
            synchronous: false,
            encoding: KeyEncoding::Base64,
            separator: b":".to_vec(),
            max_value_size: 1_034_240,
            read_queue_size: 8192,
            write_queue_size: 16384,
            incoming_queue_size: 16384,
            operation_timeout: Duration::from_secs(1),
            enqueue_timeout: Duration::from_millis(100),
            failure_mode: FailureMode::Cancel,
            shutdown_grace: Duration::from_millis(500),
            in_process_capacity: 100_000,
        }
    }
}

impl CacheConfig {
    /// Create a configuration for the given backend kind.
    pub fn new(kind: CacheKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Set the static server URI list, overriding discovery.
    pub fn with_servers(mut self, servers: Vec<String>) -> Self {
        self.servers = servers;
        self
    }

    /// Set the discovery service name.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Filter discovery to a named shard/tenant.
    pub fn with_shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }

    /// Set the topology polling period.
    pub fn with_rediscovery_interval(mut self, interval: Duration) -> Self {
        self.rediscovery_interval = interval;
        self
    }

    /// Enable or disable synchronous writes.
    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Set the key/namespace encoding.
    pub fn with_encoding(mut self, encoding: KeyEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the namespace/key separator.
    pub fn with_separator(mut self, separator: impl Into<Vec<u8>>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Set the maximum payload size (0 = unlimited).
    pub fn with_max_value_size(mut self, bytes: usize) -> Self {
        self.max_value_size = bytes;
        self
    }

    /// Set the per-operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the queue-block timeout.
    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    /// Set the failure mode.
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Set the superseded-client grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the in-process backend capacity.
    pub fn with_in_process_capacity(mut self, capacity: u64) -> Self {
        self.in_process_capacity = capacity;
        self
    }

    /// Validate the configuration. Called by the cache constructor; a
    /// failure here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.separator.is_empty() {
            return Err(Error::Config("separator must not be empty".into()));
        }
        if self.rediscovery_interval.is_zero() {
            return Err(Error::Config(
                "rediscovery interval must be non-zero".into(),
            ));
        }
        if self.operation_timeout.is_zero() {
            return Err(Error::Config("operation timeout must be non-zero".into()));
        }
        if self.read_queue_size == 0 || self.write_queue_size == 0 {
            return Err(Error::Config("queue sizes must be non-zero".into()));
        }
        if self.kind == CacheKind::Memcache && self.service_name.is_empty() {
            return Err(Error::Config(
                "memcache backend requires a service name or static servers".into(),
            ));
        }
        Ok(())
    }
}
