//! Per-namespace cache statistics.
//!
//! Statistics objects are created lazily on first access to a namespace and
//! live for the lifetime of the process. All counters are relaxed atomics;
//! they are bookkeeping, not synchronization.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The kind of cache operation, for elapsed-time accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Set,
    Add,
    Get,
    Clear,
}

/// Counters for one namespace.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    stores: AtomicU64,
    fetches: AtomicU64,
    hits: AtomicU64,
    clears: AtomicU64,
    oversized: AtomicU64,
    set_nanos: AtomicU64,
    add_nanos: AtomicU64,
    get_nanos: AtomicU64,
    clear_nanos: AtomicU64,
}

impl CacheStatistics {
    /// Record `n` attempted stores (`set` and `add` entries).
    pub fn record_stores(&self, n: u64) {
        self.stores.fetch_add(n, Ordering::Relaxed);
    }

    /// Record `n` requested keys on the read path.
    pub fn record_fetches(&self, n: u64) {
        self.fetches.fetch_add(n, Ordering::Relaxed);
    }

    /// Record `n` keys that came back with a value.
    pub fn record_hits(&self, n: u64) {
        self.hits.fetch_add(n, Ordering::Relaxed);
    }

    /// Record `n` clear requests.
    pub fn record_clears(&self, n: u64) {
        self.clears.fetch_add(n, Ordering::Relaxed);
    }

    /// Record `n` stores rejected for exceeding the size ceiling.
    pub fn record_oversized(&self, n: u64) {
        self.oversized.fetch_add(n, Ordering::Relaxed);
    }

    /// Record wall-clock time spent in one call of the given kind.
    pub fn record_elapsed(&self, kind: OpKind, elapsed: Duration) {
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        let counter = match kind {
            OpKind::Set => &self.set_nanos,
            OpKind::Add => &self.add_nanos,
            OpKind::Get => &self.get_nanos,
            OpKind::Clear => &self.clear_nanos,
        };
        counter.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn stores(&self) -> u64 {
        self.stores.load(Ordering::Relaxed)
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn clears(&self) -> u64 {
        self.clears.load(Ordering::Relaxed)
    }

    pub fn oversized(&self) -> u64 {
        self.oversized.load(Ordering::Relaxed)
    }

    /// Cumulative elapsed time for one operation kind.
    pub fn elapsed(&self, kind: OpKind) -> Duration {
        let nanos = match kind {
            OpKind::Set => &self.set_nanos,
            OpKind::Add => &self.add_nanos,
            OpKind::Get => &self.get_nanos,
            OpKind::Clear => &self.clear_nanos,
        };
        Duration::from_nanos(nanos.load(Ordering::Relaxed))
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            stores: self.stores(),
            fetches: self.fetches(),
            hits: self.hits(),
            clears: self.clears(),
            oversized: self.oversized(),
            set_elapsed: self.elapsed(OpKind::Set),
            add_elapsed: self.elapsed(OpKind::Add),
            get_elapsed: self.elapsed(OpKind::Get),
            clear_elapsed: self.elapsed(OpKind::Clear),
        }
    }
}

/// Plain copy of one namespace's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub stores: u64,
    pub fetches: u64,
    pub hits: u64,
    pub clears: u64,
    pub oversized: u64,
    pub set_elapsed: Duration,
    pub add_elapsed: Duration,
    pub get_elapsed: Duration,
    pub clear_elapsed: Duration,
}

/// Registry of per-namespace statistics.
///
/// Entries are never removed; a metrics exporter can iterate
/// [`snapshot_all`](Self::snapshot_all) on its own schedule.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    namespaces: DashMap<String, Arc<CacheStatistics>>,
}

impl StatsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the statistics object for a namespace.
    pub fn for_namespace(&self, namespace: &str) -> Arc<CacheStatistics> {
        if let Some(existing) = self.namespaces.get(namespace) {
            return existing.value().clone();
        }
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Number of namespaces seen so far.
    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    /// Whether any namespace has been touched.
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Snapshot every namespace's counters.
    pub fn snapshot_all(&self) -> HashMap<String, StatsSnapshot> {
        self.namespaces
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = CacheStatistics::default();

        stats.record_stores(3);
        stats.record_fetches(10);
        stats.record_hits(7);
        stats.record_clears(1);
        stats.record_oversized(2);

        assert_eq!(stats.stores(), 3);
        assert_eq!(stats.fetches(), 10);
        assert_eq!(stats.hits(), 7);
        assert_eq!(stats.clears(), 1);
        assert_eq!(stats.oversized(), 2);
    }

    #[test]
    fn test_elapsed_accumulates_per_kind() {
        let stats = CacheStatistics::default();

        stats.record_elapsed(OpKind::Get, Duration::from_millis(5));
        stats.record_elapsed(OpKind::Get, Duration::from_millis(7));
        stats.record_elapsed(OpKind::Set, Duration::from_millis(1));

        assert_eq!(stats.elapsed(OpKind::Get), Duration::from_millis(12));
        assert_eq!(stats.elapsed(OpKind::Set), Duration::from_millis(1));
        assert_eq!(stats.elapsed(OpKind::Clear), Duration::ZERO);
    }

    #[test]
    fn test_registry_is_lazy_and_stable() {
        let registry = StatsRegistry::new();
        assert!(registry.is_empty());

        let a = registry.for_namespace("users");
        let b = registry.for_namespace("users");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        a.record_hits(1);
        let all = registry.snapshot_all();
        assert_eq!(all["users"].hits, 1);
    }
}
