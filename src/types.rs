//! Core types used throughout the caching client.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// A single memcached server address.
///
/// The canonical string form `host:port` is also the node key used for
/// consistent-hash ring point generation, so it must be stable across
/// processes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("missing port in endpoint: {s}")))?;
        if host.is_empty() {
            return Err(Error::Config(format!("missing host in endpoint: {s}")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::Config(format!("invalid port in endpoint: {s}")))?;
        Ok(Self::new(host, port))
    }
}

/// The current set of server endpoints backing a distributed cache.
///
/// Equality is set-equality: two topologies listing the same endpoints in a
/// different order are equal. This is what the cluster manager uses to detect
/// that a rediscovery run found no real change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterTopology {
    endpoints: BTreeSet<Endpoint>,
}

impl ClusterTopology {
    /// An empty topology ("no cache available").
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a topology from a collection of endpoints. Duplicates collapse.
    pub fn from_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        Self {
            endpoints: endpoints.into_iter().collect(),
        }
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether the topology has no endpoints.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Whether the topology contains the given endpoint.
    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.contains(endpoint)
    }

    /// Iterate over the endpoints in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    /// A copy of this topology with one endpoint added.
    pub fn with(&self, endpoint: Endpoint) -> Self {
        let mut endpoints = self.endpoints.clone();
        endpoints.insert(endpoint);
        Self { endpoints }
    }

    /// A copy of this topology with one endpoint removed.
    pub fn without(&self, endpoint: &Endpoint) -> Self {
        let mut endpoints = self.endpoints.clone();
        endpoints.remove(endpoint);
        Self { endpoints }
    }
}

impl FromIterator<Endpoint> for ClusterTopology {
    fn from_iter<T: IntoIterator<Item = Endpoint>>(iter: T) -> Self {
        Self::from_endpoints(iter)
    }
}

/// A single cache entry handed to `set`/`add`.
///
/// Immutable once constructed. The payload is owned-and-shared: callers must
/// not mutate the underlying bytes after hand-off (enforced by `Bytes`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    key: String,
    data: Option<Bytes>,
    expiry: Option<SystemTime>,
}

impl CacheEntry {
    /// Create an entry with no advisory expiry.
    pub fn new(key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            data: Some(data.into()),
            expiry: None,
        }
    }

    /// Create an entry with an absolute advisory expiry.
    ///
    /// The expiry must be in the future at construction time. It is not
    /// re-checked later: clocks advance, and expiry is advisory anyway.
    pub fn with_expiry(
        key: impl Into<String>,
        data: impl Into<Bytes>,
        expiry: SystemTime,
    ) -> Result<Self> {
        if expiry <= SystemTime::now() {
            return Err(Error::InvalidEntry("expiry must be in the future".into()));
        }
        Ok(Self {
            key: key.into(),
            data: Some(data.into()),
            expiry: Some(expiry),
        })
    }

    /// Create an entry expiring a duration from now.
    pub fn expiring_in(key: impl Into<String>, data: impl Into<Bytes>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            data: Some(data.into()),
            expiry: Some(SystemTime::now() + ttl),
        }
    }

    /// The plain (un-namespaced) key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The payload, if any.
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    /// Payload size in bytes (0 for an absent payload).
    pub fn data_len(&self) -> usize {
        self.data.as_ref().map(|d| d.len()).unwrap_or(0)
    }

    /// The advisory expiry, if any. `None` means "no advisory limit".
    pub fn expiry(&self) -> Option<SystemTime> {
        self.expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse_and_display() {
        let ep: Endpoint = "cache-1.example.com:11211".parse().unwrap();
        assert_eq!(ep.host, "cache-1.example.com");
        assert_eq!(ep.port, 11211);
        assert_eq!(ep.to_string(), "cache-1.example.com:11211");

        assert!("no-port".parse::<Endpoint>().is_err());
        assert!(":11211".parse::<Endpoint>().is_err());
        assert!("host:notaport".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_topology_set_equality() {
        let a = ClusterTopology::from_endpoints(vec![
            Endpoint::new("a", 1),
            Endpoint::new("b", 2),
        ]);
        let b = ClusterTopology::from_endpoints(vec![
            Endpoint::new("b", 2),
            Endpoint::new("a", 1),
            Endpoint::new("a", 1),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);

        let c = b.without(&Endpoint::new("a", 1));
        assert_ne!(a, c);
        assert_eq!(c.len(), 1);
        assert_eq!(c.with(Endpoint::new("a", 1)), a);
    }

    #[test]
    fn test_entry_expiry_must_be_future() {
        let past = SystemTime::now() - Duration::from_secs(10);
        assert!(CacheEntry::with_expiry("k", "v", past).is_err());

        let future = SystemTime::now() + Duration::from_secs(60);
        let entry = CacheEntry::with_expiry("k", "v", future).unwrap();
        assert_eq!(entry.expiry(), Some(future));
        assert_eq!(entry.key(), "k");
        assert_eq!(entry.data_len(), 1);
    }

    #[test]
    fn test_entry_without_expiry() {
        let entry = CacheEntry::new("k", Bytes::from_static(b"value"));
        assert_eq!(entry.expiry(), None);
        assert_eq!(entry.data().unwrap().as_ref(), b"value");
    }
}
