//! Lock-free shared handle to the current hash ring.
//!
//! The ring value itself is immutable ([`KetamaRing`]); this router holds it
//! in an atomic reference so operation threads read it without locks while
//! node add/remove publish replacement rings through a compare-and-swap
//! retry loop.

use crate::routing::ring::KetamaRing;
use crate::types::{ClusterTopology, Endpoint};
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared, lock-free view of the current [`KetamaRing`].
#[derive(Debug)]
pub struct RingRouter {
    ring: ArcSwap<KetamaRing>,
}

impl RingRouter {
    /// Wrap an existing ring.
    pub fn new(ring: KetamaRing) -> Self {
        Self {
            ring: ArcSwap::from_pointee(ring),
        }
    }

    /// Build a router directly from a topology.
    pub fn from_topology(topology: &ClusterTopology) -> Self {
        Self::new(KetamaRing::build(topology))
    }

    /// The current ring snapshot. Cheap atomic load; the snapshot stays
    /// valid however long the caller holds it.
    pub fn current(&self) -> Arc<KetamaRing> {
        self.ring.load_full()
    }

    /// Replace the ring wholesale from a new topology.
    pub fn replace_topology(&self, topology: &ClusterTopology) {
        let next = self.ring.load().with_replaced_topology(topology);
        self.ring.store(Arc::new(next));
    }

    /// Add a node. Concurrent add/remove attempts serialize through a CAS
    /// retry loop without ever blocking readers.
    pub fn add_node(&self, node: &Endpoint) {
        self.ring.rcu(|ring| ring.with_node_added(node));
    }

    /// Remove a node, same CAS discipline as [`add_node`](Self::add_node).
    pub fn remove_node(&self, node: &Endpoint) {
        self.ring.rcu(|ring| ring.with_node_removed(node));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n)
            .map(|i| Endpoint::new(format!("cache-{i}"), 11211))
            .collect()
    }

    #[test]
    fn test_snapshot_survives_replacement() {
        let eps = endpoints(3);
        let router = RingRouter::from_topology(&eps.iter().cloned().collect());

        let before = router.current();
        router.remove_node(&eps[0]);
        let after = router.current();

        // The old snapshot is untouched and still answers lookups.
        assert_eq!(before.node_count(), 3);
        assert_eq!(after.node_count(), 2);
        assert!(before.primary(b"k").is_some());
    }

    #[test]
    fn test_add_remove_roundtrip() {
        let eps = endpoints(2);
        let router = RingRouter::from_topology(&eps.iter().cloned().collect());

        let extra = Endpoint::new("cache-extra", 11211);
        router.add_node(&extra);
        assert!(router.current().all_nodes().contains(&extra));

        router.remove_node(&extra);
        assert!(!router.current().all_nodes().contains(&extra));
        assert_eq!(router.current().node_count(), 2);
    }

    #[test]
    fn test_concurrent_removals_converge() {
        let eps = endpoints(8);
        let router = Arc::new(RingRouter::from_topology(&eps.iter().cloned().collect()));

        let handles: Vec<_> = eps
            .iter()
            .take(6)
            .cloned()
            .map(|ep| {
                let router = router.clone();
                std::thread::spawn(move || router.remove_node(&ep))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let ring = router.current();
        assert_eq!(ring.node_count(), 2);
        assert!(ring.all_nodes().contains(&eps[6]));
        assert!(ring.all_nodes().contains(&eps[7]));
    }
}
