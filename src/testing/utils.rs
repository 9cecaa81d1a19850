//! In-memory doubles for the connector and topology seams.

use crate::error::{ConnectionError, Result};
use crate::memcache::{Connector, NodeConnection};
use crate::topology::TopologySource;
use crate::types::{ClusterTopology, Endpoint};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    /// Absolute epoch seconds; 0 = never expires.
    expires_epoch: u32,
}

impl StoredValue {
    fn expired(&self, now_epoch: u32) -> bool {
        self.expires_epoch != 0 && self.expires_epoch <= now_epoch
    }
}

/// One fake memcached server. Survives reconnects, like a real server.
#[derive(Debug, Default)]
pub struct MemoryServer {
    entries: Mutex<HashMap<Vec<u8>, StoredValue>>,
}

impl MemoryServer {
    fn now_epoch() -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_secs().min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Self::now_epoch();
        self.entries
            .lock()
            .values()
            .filter(|value| !value.expired(now))
            .count()
    }

    /// Whether the server holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_many(&self, keys: &[Vec<u8>]) -> HashMap<Vec<u8>, Bytes> {
        let now = Self::now_epoch();
        let mut entries = self.entries.lock();
        let mut results = HashMap::new();
        for key in keys {
            match entries.get(key) {
                Some(value) if value.expired(now) => {
                    entries.remove(key);
                }
                Some(value) => {
                    results.insert(key.clone(), value.data.clone());
                }
                None => {}
            }
        }
        results
    }

    fn set(&self, key: &[u8], value: &Bytes, expires_epoch: u32) -> bool {
        self.entries.lock().insert(
            key.to_vec(),
            StoredValue {
                data: value.clone(),
                expires_epoch,
            },
        );
        true
    }

    fn add(&self, key: &[u8], value: &Bytes, expires_epoch: u32) -> bool {
        let now = Self::now_epoch();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(existing) if !existing.expired(now) => false,
            _ => {
                entries.insert(
                    key.to_vec(),
                    StoredValue {
                        data: value.clone(),
                        expires_epoch,
                    },
                );
                true
            }
        }
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.entries.lock().remove(key).is_some()
    }
}

/// One "connection" to a [`MemoryServer`].
#[derive(Debug)]
pub struct MemoryConnection {
    server: Arc<MemoryServer>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn new(server: Arc<MemoryServer>) -> Self {
        Self {
            server,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> std::result::Result<(), ConnectionError> {
        if self.closed.load(Ordering::Relaxed) {
            Err(ConnectionError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl NodeConnection for MemoryConnection {
    async fn get_many(
        &self,
        keys: &[Vec<u8>],
    ) -> std::result::Result<HashMap<Vec<u8>, Bytes>, ConnectionError> {
        self.check_open()?;
        Ok(self.server.get_many(keys))
    }

    async fn set(
        &self,
        key: &[u8],
        value: &Bytes,
        expiry_epoch: u32,
    ) -> std::result::Result<bool, ConnectionError> {
        self.check_open()?;
        Ok(self.server.set(key, value, expiry_epoch))
    }

    async fn add(
        &self,
        key: &[u8],
        value: &Bytes,
        expiry_epoch: u32,
    ) -> std::result::Result<bool, ConnectionError> {
        self.check_open()?;
        Ok(self.server.add(key, value, expiry_epoch))
    }

    async fn delete(&self, key: &[u8]) -> std::result::Result<bool, ConnectionError> {
        self.check_open()?;
        Ok(self.server.delete(key))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Connector over a fleet of in-memory servers, one per endpoint.
///
/// Server state persists across reconnects; endpoints can be marked down to
/// make connection attempts fail.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    servers: Mutex<HashMap<Endpoint, Arc<MemoryServer>>>,
    down: Mutex<HashSet<Endpoint>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The server behind an endpoint, created on first access.
    pub fn server(&self, endpoint: &Endpoint) -> Arc<MemoryServer> {
        self.servers
            .lock()
            .entry(endpoint.clone())
            .or_default()
            .clone()
    }

    /// Make future connection attempts to the endpoint fail (or succeed
    /// again).
    pub fn set_down(&self, endpoint: &Endpoint, down: bool) {
        let mut set = self.down.lock();
        if down {
            set.insert(endpoint.clone());
        } else {
            set.remove(endpoint);
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> std::result::Result<Arc<dyn NodeConnection>, ConnectionError> {
        if self.down.lock().contains(endpoint) {
            return Err(ConnectionError::ConnectFailed {
                addr: endpoint.to_string(),
                reason: "endpoint marked down".to_string(),
            });
        }
        Ok(Arc::new(MemoryConnection::new(self.server(endpoint))))
    }
}

/// Topology source whose result tests can flip at will.
#[derive(Debug)]
pub struct FixedTopologySource {
    topology: RwLock<ClusterTopology>,
}

impl FixedTopologySource {
    pub fn new(topology: ClusterTopology) -> Self {
        Self {
            topology: RwLock::new(topology),
        }
    }

    /// Replace what the next resolution returns.
    pub fn set(&self, topology: ClusterTopology) {
        *self.topology.write() = topology;
    }
}

#[async_trait]
impl TopologySource for FixedTopologySource {
    async fn resolve(&self) -> Result<ClusterTopology> {
        Ok(self.topology.read().clone())
    }
}

/// `n` distinct endpoints for a test cluster.
pub fn test_endpoints(n: usize) -> Vec<Endpoint> {
    (0..n)
        .map(|i| Endpoint::new(format!("cache-{i}"), 11211))
        .collect()
}

/// Install a compact subscriber so `RUST_LOG` controls test output. Safe to
/// call from every test; only the first call wins.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll a predicate until it holds or the timeout elapses.
pub async fn wait_until<F>(predicate: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_server_honors_expiry() {
        let server = MemoryServer::default();
        let value = Bytes::from_static(b"v");

        assert!(server.set(b"fresh", &value, 0));
        assert!(server.set(b"stale", &value, 1)); // long past

        let found = server.get_many(&[b"fresh".to_vec(), b"stale".to_vec()]);
        assert!(found.contains_key(&b"fresh".to_vec()));
        assert!(!found.contains_key(&b"stale".to_vec()));

        // Expired entries free the slot for add.
        assert!(server.add(b"stale", &value, 0));
        assert!(!server.add(b"fresh", &value, 0));
    }

    #[tokio::test]
    async fn test_connector_down_endpoints() {
        let connector = MemoryConnector::new();
        let endpoint = Endpoint::new("cache-0", 11211);

        assert!(connector.connect(&endpoint).await.is_ok());
        connector.set_down(&endpoint, true);
        assert!(connector.connect(&endpoint).await.is_err());
        connector.set_down(&endpoint, false);
        assert!(connector.connect(&endpoint).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_operations() {
        let connector = MemoryConnector::new();
        let endpoint = Endpoint::new("cache-0", 11211);
        let conn = connector.connect(&endpoint).await.unwrap();

        conn.close().await;
        assert!(matches!(
            conn.delete(b"k").await,
            Err(ConnectionError::Closed)
        ));

        // Server state outlives the connection.
        let server = connector.server(&endpoint);
        assert!(server.is_empty());
    }
}
