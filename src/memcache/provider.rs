//! Operation pipeline for the memcached backend.
//!
//! Encodes namespace+key onto the wire, enforces the payload size ceiling,
//! dispatches operations against the manager's current client and decodes
//! bulk-get responses back to plain keys. Network faults degrade to per-key
//! outcomes here; only an undecodable response key propagates as an error.

use crate::config::{CacheConfig, KeyEncoding};
use crate::error::{Error, OpOutcome, Result};
use crate::memcache::manager::ClusterManager;
use crate::provider::InternalCacheProvider;
use crate::stats::CacheStatistics;
use crate::types::CacheEntry;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

/// How long to stay quiet between "no backend available" warnings.
const MISSING_CLIENT_WARN_COOLDOWN: Duration = Duration::from_secs(3600);

/// Memcached-backed implementation of [`InternalCacheProvider`].
pub struct MemcacheProvider {
    manager: Arc<ClusterManager>,
    encoding: KeyEncoding,
    separator: Vec<u8>,
    max_value_size: usize,
    synchronous: bool,

    /// Millis-since-creation after which the next missing-client warning may
    /// fire. Keeps a sustained outage from flooding the logs.
    warn_after: AtomicU64,
    created: Instant,
}

impl MemcacheProvider {
    /// Build the pipeline over a started manager.
    pub fn new(manager: Arc<ClusterManager>, config: &CacheConfig) -> Self {
        Self {
            manager,
            encoding: config.encoding,
            separator: config.separator.clone(),
            max_value_size: config.max_value_size,
            synchronous: config.synchronous,
            warn_after: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// The manager owning this pipeline's client, for lifecycle and
    /// diagnostics.
    pub fn manager(&self) -> &Arc<ClusterManager> {
        &self.manager
    }

    fn encode_component(&self, component: &str) -> Vec<u8> {
        match self.encoding {
            KeyEncoding::None => component.as_bytes().to_vec(),
            KeyEncoding::Base64 => URL_SAFE_NO_PAD.encode(component).into_bytes(),
        }
    }

    /// Wire key: `encode(namespace) + separator + encode(key)`.
    fn wire_key(&self, namespace: &str, key: &str) -> Vec<u8> {
        let namespace = self.encode_component(namespace);
        let key = self.encode_component(key);
        let mut wire = Vec::with_capacity(namespace.len() + self.separator.len() + key.len());
        wire.extend_from_slice(&namespace);
        wire.extend_from_slice(&self.separator);
        wire.extend_from_slice(&key);
        wire
    }

    /// Strip the namespace prefix from a returned wire key and decode the
    /// remainder back to the plain key.
    fn decode_key(&self, namespace: &str, wire: &[u8]) -> Result<String> {
        let prefix_len = self.encode_component(namespace).len() + self.separator.len();
        let encoded = wire.get(prefix_len..).ok_or_else(|| {
            Error::Decode(format!(
                "returned key shorter than namespace prefix ({} < {prefix_len})",
                wire.len()
            ))
        })?;
        match self.encoding {
            KeyEncoding::None => String::from_utf8(encoded.to_vec())
                .map_err(|_| Error::Decode("returned key is not valid utf-8".into())),
            KeyEncoding::Base64 => {
                let decoded = URL_SAFE_NO_PAD
                    .decode(encoded)
                    .map_err(|e| Error::Decode(format!("returned key is not base64: {e}")))?;
                String::from_utf8(decoded)
                    .map_err(|_| Error::Decode("decoded key is not valid utf-8".into()))
            }
        }
    }

    /// Absolute epoch seconds for the wire protocol; 0 = never expire.
    /// Saturates on overflow rather than wrapping into the past.
    fn expiry_epoch(expiry: Option<SystemTime>) -> u32 {
        match expiry {
            None => 0,
            Some(at) => at
                .duration_since(UNIX_EPOCH)
                .map(|since| since.as_secs().min(u32::MAX as u64) as u32)
                .unwrap_or(0),
        }
    }

    /// The current client, warning (rate-limited) when there is none.
    fn client_or_warn(&self) -> Option<Arc<crate::memcache::ClusterClient>> {
        let client = self.manager.current_client();
        if client.is_none() {
            let now = self.created.elapsed().as_millis() as u64;
            let after = self.warn_after.load(Ordering::Relaxed);
            if now >= after
                && self
                    .warn_after
                    .compare_exchange(
                        after,
                        now + MISSING_CLIENT_WARN_COOLDOWN.as_millis() as u64,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                warn!("no memcached backend available, cache operations are no-ops");
            }
        }
        client
    }

    fn oversized(&self, entry: &CacheEntry) -> bool {
        self.max_value_size > 0 && entry.data_len() > self.max_value_size
    }
}

#[async_trait]
impl InternalCacheProvider for MemcacheProvider {
    async fn set(
        &self,
        namespace: &str,
        entries: Vec<CacheEntry>,
        stats: &CacheStatistics,
    ) -> HashMap<String, OpOutcome> {
        let Some(client) = self.client_or_warn() else {
            return HashMap::new();
        };

        let mut outcomes = HashMap::with_capacity(entries.len());
        for entry in entries {
            if self.oversized(&entry) {
                debug!(
                    namespace,
                    key = entry.key(),
                    size = entry.data_len(),
                    limit = self.max_value_size,
                    "rejecting oversized store"
                );
                stats.record_oversized(1);
                outcomes.insert(entry.key().to_string(), OpOutcome::Oversized);
                continue;
            }

            let wire = self.wire_key(namespace, entry.key());
            let value = entry.data().cloned().unwrap_or_else(Bytes::new);
            let expiry = Self::expiry_epoch(entry.expiry());

            let outcome = if self.synchronous {
                let outcome = client.set(&wire, value, expiry).await;
                if outcome.is_degraded() {
                    debug!(namespace, key = entry.key(), ?outcome, "set not confirmed");
                }
                outcome
            } else {
                let client = client.clone();
                let key = entry.key().to_string();
                tokio::spawn(async move {
                    let outcome = client.set(&wire, value, expiry).await;
                    if outcome.is_degraded() {
                        trace!(key = %key, ?outcome, "async set not confirmed");
                    }
                });
                OpOutcome::Enqueued
            };
            outcomes.insert(entry.key().to_string(), outcome);
        }
        outcomes
    }

    async fn add(
        &self,
        namespace: &str,
        entries: Vec<CacheEntry>,
        stats: &CacheStatistics,
    ) -> HashMap<String, bool> {
        let Some(client) = self.client_or_warn() else {
            return HashMap::new();
        };

        let mut added = HashMap::with_capacity(entries.len());
        for entry in entries {
            if self.oversized(&entry) {
                debug!(
                    namespace,
                    key = entry.key(),
                    size = entry.data_len(),
                    limit = self.max_value_size,
                    "rejecting oversized add"
                );
                stats.record_oversized(1);
                added.insert(entry.key().to_string(), false);
                continue;
            }

            let wire = self.wire_key(namespace, entry.key());
            let value = entry.data().cloned().unwrap_or_else(Bytes::new);
            let expiry = Self::expiry_epoch(entry.expiry());

            // Only synchronous mode can report whether the add won; an
            // asynchronous add is unconfirmed and reported as false.
            let stored = if self.synchronous {
                let outcome = client.add(&wire, value, expiry).await;
                if outcome.is_degraded() {
                    debug!(namespace, key = entry.key(), ?outcome, "add not confirmed");
                }
                outcome == OpOutcome::Stored
            } else {
                let client = client.clone();
                tokio::spawn(async move {
                    client.add(&wire, value, expiry).await;
                });
                false
            };
            added.insert(entry.key().to_string(), stored);
        }
        added
    }

    async fn get(
        &self,
        namespace: &str,
        keys: &[String],
        _stats: &CacheStatistics,
    ) -> Result<HashMap<String, Bytes>> {
        let Some(client) = self.client_or_warn() else {
            return Ok(HashMap::new());
        };

        let wire_keys: Vec<Vec<u8>> = keys
            .iter()
            .map(|key| self.wire_key(namespace, key))
            .collect();

        let found = client.get_many(&wire_keys).await;
        let mut results = HashMap::with_capacity(found.len());
        for (wire, value) in found {
            let key = self.decode_key(namespace, &wire)?;
            results.insert(key, value);
        }
        Ok(results)
    }

    async fn clear(
        &self,
        namespace: &str,
        keys: &[String],
        _stats: &CacheStatistics,
    ) -> HashMap<String, OpOutcome> {
        let Some(client) = self.client_or_warn() else {
            return HashMap::new();
        };

        let mut outcomes = HashMap::with_capacity(keys.len());
        for key in keys {
            let wire = self.wire_key(namespace, key);

            let outcome = if self.synchronous {
                let outcome = client.delete(&wire).await;
                if outcome.is_degraded() {
                    debug!(namespace, key = %key, ?outcome, "clear not confirmed");
                }
                outcome
            } else {
                let client = client.clone();
                tokio::spawn(async move {
                    client.delete(&wire).await;
                });
                OpOutcome::Enqueued
            };
            outcomes.insert(key.clone(), outcome);
        }
        outcomes
    }

    async fn shutdown(&self) {
        self.manager.stop().await;
    }
}

impl std::fmt::Debug for MemcacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcacheProvider")
            .field("encoding", &self.encoding)
            .field("synchronous", &self.synchronous)
            .field("max_value_size", &self.max_value_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheKind;
    use crate::topology::StaticTopologySource;
    use crate::memcache::TcpConnector;

    fn pipeline(encoding: KeyEncoding, separator: &[u8]) -> MemcacheProvider {
        let config = CacheConfig::new(CacheKind::Memcache)
            .with_encoding(encoding)
            .with_separator(separator.to_vec())
            .with_max_value_size(0);
        let manager = ClusterManager::new(
            Arc::new(StaticTopologySource::new(&[])),
            Arc::new(TcpConnector::new(Duration::from_millis(100))),
            config.clone(),
        );
        MemcacheProvider::new(manager, &config)
    }

    #[test]
    fn test_wire_key_roundtrip_base64() {
        let provider = pipeline(KeyEncoding::Base64, b":");
        let wire = provider.wire_key("users", "alice:with:colons");
        let decoded = provider.decode_key("users", &wire).unwrap();
        assert_eq!(decoded, "alice:with:colons");
    }

    #[test]
    fn test_wire_key_roundtrip_identity() {
        let provider = pipeline(KeyEncoding::None, b"|");
        let wire = provider.wire_key("users", "alice");
        assert_eq!(wire, b"users|alice".to_vec());
        assert_eq!(provider.decode_key("users", &wire).unwrap(), "alice");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let provider = pipeline(KeyEncoding::Base64, b":");
        assert!(provider.decode_key("users", b"x").is_err());

        let mut wire = provider.wire_key("users", "alice");
        wire.push(b'!');
        assert!(provider.decode_key("users", &wire).is_err());
    }

    #[test]
    fn test_expiry_epoch_conversion() {
        assert_eq!(MemcacheProvider::expiry_epoch(None), 0);

        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(MemcacheProvider::expiry_epoch(Some(at)), 1_700_000_000);

        // Far future saturates instead of wrapping.
        let far = UNIX_EPOCH + Duration::from_secs(u64::MAX / 2);
        assert_eq!(MemcacheProvider::expiry_epoch(Some(far)), u32::MAX);
    }

    #[test]
    fn test_oversized_gate() {
        let config = CacheConfig::new(CacheKind::Memcache).with_max_value_size(4);
        let manager = ClusterManager::new(
            Arc::new(StaticTopologySource::new(&[])),
            Arc::new(TcpConnector::new(Duration::from_millis(100))),
            config.clone(),
        );
        let provider = MemcacheProvider::new(manager, &config);

        assert!(!provider.oversized(&CacheEntry::new("k", "1234")));
        assert!(provider.oversized(&CacheEntry::new("k", "12345")));

        let unlimited = pipeline(KeyEncoding::Base64, b":");
        assert!(!unlimited.oversized(&CacheEntry::new("k", vec![0u8; 10_000_000])));
    }
}
