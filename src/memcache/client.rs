//! Cluster client: one connection per server node, routed by the hash ring.
//!
//! A `ClusterClient` is built for one topology and never changes membership;
//! the [`ClusterManager`](crate::memcache::ClusterManager) replaces the whole
//! client when the topology changes. Within a client's lifetime the ring can
//! only shrink: a node whose connection faults is removed so later
//! operations route around it until the next reconfiguration.

use crate::config::{CacheConfig, FailureMode};
use crate::error::{Error, OpOutcome, Result};
use crate::memcache::connection::{Connector, NodeConnection};
use crate::routing::RingRouter;
use crate::types::{ClusterTopology, Endpoint};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};

struct NodeHandle {
    connection: Arc<dyn NodeConnection>,
    read_permits: Arc<Semaphore>,
    write_permits: Arc<Semaphore>,
}

enum WriteOp {
    Set { value: Bytes, expiry_epoch: u32 },
    Add { value: Bytes, expiry_epoch: u32 },
    Delete,
}

/// Live client for one resolved cluster topology.
pub struct ClusterClient {
    nodes: HashMap<Endpoint, NodeHandle>,
    router: RingRouter,
    operation_timeout: Duration,
    enqueue_timeout: Duration,
    read_queue_size: usize,
    write_queue_size: usize,
}

impl ClusterClient {
    /// Connect to every endpoint of the topology. Any endpoint failing to
    /// connect fails the whole client, so the manager keeps the previous
    /// one.
    pub async fn connect(
        topology: &ClusterTopology,
        connector: &Arc<dyn Connector>,
        config: &CacheConfig,
    ) -> Result<Self> {
        if config.failure_mode == FailureMode::Retry {
            debug!("failure mode 'retry' is treated as 'cancel', this layer never retries on its own");
        }

        let mut nodes = HashMap::with_capacity(topology.len());
        for endpoint in topology.iter() {
            match connector.connect(endpoint).await {
                Ok(connection) => {
                    nodes.insert(
                        endpoint.clone(),
                        NodeHandle {
                            connection,
                            read_permits: Arc::new(Semaphore::new(config.read_queue_size)),
                            write_permits: Arc::new(Semaphore::new(config.write_queue_size)),
                        },
                    );
                }
                Err(err) => {
                    for handle in nodes.values() {
                        handle.connection.close().await;
                    }
                    return Err(Error::Connection(err));
                }
            }
        }

        Ok(Self {
            nodes,
            router: RingRouter::from_topology(topology),
            operation_timeout: config.operation_timeout,
            enqueue_timeout: config.enqueue_timeout,
            read_queue_size: config.read_queue_size,
            write_queue_size: config.write_queue_size,
        })
    }

    /// The endpoints this client was built for.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.nodes.keys().cloned().collect()
    }

    /// The router holding this client's ring.
    pub fn router(&self) -> &RingRouter {
        &self.router
    }

    /// Store a value on the key's node.
    pub async fn set(&self, key: &[u8], value: Bytes, expiry_epoch: u32) -> OpOutcome {
        self.dispatch_write(key, WriteOp::Set { value, expiry_epoch })
            .await
    }

    /// Store a value only if absent. `Stored` means added, `NotStored` means
    /// the key already existed.
    pub async fn add(&self, key: &[u8], value: Bytes, expiry_epoch: u32) -> OpOutcome {
        self.dispatch_write(key, WriteOp::Add { value, expiry_epoch })
            .await
    }

    /// Delete a key from its node.
    pub async fn delete(&self, key: &[u8]) -> OpOutcome {
        self.dispatch_write(key, WriteOp::Delete).await
    }

    async fn dispatch_write(&self, key: &[u8], op: WriteOp) -> OpOutcome {
        let ring = self.router.current();
        let candidates: Vec<Endpoint> = ring.sequence(key).cloned().collect();

        for endpoint in candidates {
            let Some(handle) = self.nodes.get(&endpoint) else {
                continue;
            };

            let permit = match timeout(self.enqueue_timeout, handle.write_permits.acquire()).await
            {
                Ok(Ok(permit)) => permit,
                // Semaphore closed: the client is shutting down.
                Ok(Err(_)) => return OpOutcome::Cancelled,
                Err(_) => {
                    debug!(node = %endpoint, "write queue full");
                    return OpOutcome::QueueFull;
                }
            };

            let result = timeout(self.operation_timeout, async {
                match &op {
                    WriteOp::Set { value, expiry_epoch } => {
                        handle.connection.set(key, value, *expiry_epoch).await
                    }
                    WriteOp::Add { value, expiry_epoch } => {
                        handle.connection.add(key, value, *expiry_epoch).await
                    }
                    WriteOp::Delete => handle.connection.delete(key).await,
                }
            })
            .await;
            drop(permit);

            match result {
                // Timeouts are never retried at this layer.
                Err(_) => return OpOutcome::TimedOut,
                Ok(Ok(true)) => return OpOutcome::Stored,
                Ok(Ok(false)) => return OpOutcome::NotStored,
                Ok(Err(err)) => {
                    debug!(node = %endpoint, error = %err, "write failed, trying next ring candidate");
                    self.router.remove_node(&endpoint);
                }
            }
        }

        OpOutcome::Cancelled
    }

    /// Bulk fetch: one multi-get per owning node. Per-node faults degrade to
    /// misses, never to errors.
    pub async fn get_many(&self, keys: &[Vec<u8>]) -> HashMap<Vec<u8>, Bytes> {
        let ring = self.router.current();
        let mut by_node: HashMap<Endpoint, Vec<Vec<u8>>> = HashMap::new();
        for key in keys {
            if let Some(node) = ring.primary(key) {
                by_node.entry(node.clone()).or_default().push(key.clone());
            }
        }

        let mut results = HashMap::new();
        for (endpoint, node_keys) in by_node {
            let Some(handle) = self.nodes.get(&endpoint) else {
                continue;
            };

            let permit = match timeout(self.enqueue_timeout, handle.read_permits.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => continue,
                Err(_) => {
                    debug!(node = %endpoint, keys = node_keys.len(), "read queue full, treating as misses");
                    continue;
                }
            };

            match timeout(self.operation_timeout, handle.connection.get_many(&node_keys)).await {
                Ok(Ok(found)) => {
                    trace!(node = %endpoint, requested = node_keys.len(), found = found.len(), "bulk fetch");
                    results.extend(found);
                }
                Ok(Err(err)) => {
                    debug!(node = %endpoint, error = %err, "bulk fetch failed, treating as misses");
                    self.router.remove_node(&endpoint);
                }
                Err(_) => {
                    debug!(node = %endpoint, "bulk fetch timed out, treating as misses");
                }
            }
            drop(permit);
        }

        results
    }

    /// Stop accepting operations, wait up to `grace` for in-flight ones to
    /// drain, then close every connection.
    pub async fn shutdown(&self, grace: Duration) {
        let deadline = Instant::now() + grace;

        for handle in self.nodes.values() {
            handle.read_permits.close();
            handle.write_permits.close();
        }

        for (endpoint, handle) in &self.nodes {
            while handle.read_permits.available_permits() < self.read_queue_size
                || handle.write_permits.available_permits() < self.write_queue_size
            {
                if Instant::now() >= deadline {
                    debug!(node = %endpoint, "grace period expired with operations in flight");
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
            handle.connection.close().await;
        }
    }
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("nodes", &self.nodes.len())
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}
