//! Ketama-style consistent hash ring.
//!
//! Each node is projected onto the ring at many positions derived from MD5
//! digests of its canonical `host:port` key, so that adding or removing one
//! node only remaps the keys that hashed to it. A ring is an immutable
//! snapshot: every topology change builds a fresh ring and replaces the old
//! one wholesale, so concurrent lookups never observe a half-built ring.

use crate::types::{ClusterTopology, Endpoint};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Ring points generated per node.
///
/// Each MD5 digest yields four points, so a node contributes
/// `RING_REPETITIONS / 4` digests.
pub const RING_REPETITIONS: usize = 160;

/// Maximum number of distinct candidate nodes a key's fallback sequence
/// yields.
pub const MAX_SEQUENCE_NODES: usize = 7;

/// Immutable consistent-hash ring snapshot.
#[derive(Debug, Clone, Default)]
pub struct KetamaRing {
    /// Ring position to owning node.
    points: BTreeMap<u64, Endpoint>,
    /// The node set the ring was built from.
    nodes: BTreeSet<Endpoint>,
    repetitions: usize,
}

impl KetamaRing {
    /// Build a ring from a topology with the standard repetition factor.
    pub fn build(topology: &ClusterTopology) -> Self {
        Self::with_repetitions(topology, RING_REPETITIONS)
    }

    /// Build a ring with an explicit repetition factor.
    ///
    /// Position collisions between nodes resolve as last-insertion-wins and
    /// are logged, not fatal; iteration order over the topology is canonical,
    /// so the resolution is deterministic.
    pub fn with_repetitions(topology: &ClusterTopology, repetitions: usize) -> Self {
        let mut points = BTreeMap::new();
        let mut collisions = 0usize;

        for node in topology.iter() {
            let canonical = node.to_string();
            for i in 0..repetitions / 4 {
                let digest = md5::compute(format!("{canonical}-{i}").as_bytes());
                let bytes = digest.0;
                for group in 0..4 {
                    let position = u32::from_le_bytes([
                        bytes[group * 4],
                        bytes[group * 4 + 1],
                        bytes[group * 4 + 2],
                        bytes[group * 4 + 3],
                    ]) as u64;
                    if let Some(previous) = points.insert(position, node.clone()) {
                        if &previous != node {
                            collisions += 1;
                        }
                    }
                }
            }
        }

        if collisions > 0 {
            warn!(
                collisions,
                nodes = topology.len(),
                "hash ring position collisions, last insertion wins"
            );
        }

        Self {
            points,
            nodes: topology.iter().cloned().collect(),
            repetitions,
        }
    }

    /// Number of points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the ring has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of distinct nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The repetition factor the ring was built with.
    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    /// All nodes on the ring.
    pub fn all_nodes(&self) -> &BTreeSet<Endpoint> {
        &self.nodes
    }

    /// The node owning a key, or `None` on an empty ring.
    pub fn primary(&self, key: &[u8]) -> Option<&Endpoint> {
        let hash = Self::hash_key(key);
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, node)| node)
    }

    /// Ordered, non-repeating fallback sequence for a key: the primary node
    /// first, then up to [`MAX_SEQUENCE_NODES`] distinct nodes continuing
    /// around the ring. Restartable per call.
    pub fn sequence(&self, key: &[u8]) -> impl Iterator<Item = &Endpoint> {
        let hash = Self::hash_key(key);
        let limit = MAX_SEQUENCE_NODES.min(self.nodes.len());
        let mut candidates: Vec<&Endpoint> = Vec::with_capacity(limit);

        for (_, node) in self
            .points
            .range(hash..)
            .chain(self.points.range(..hash))
        {
            if candidates.len() >= limit {
                break;
            }
            if !candidates.contains(&node) {
                candidates.push(node);
            }
        }

        candidates.into_iter()
    }

    /// A new ring built from a different topology with the same repetition
    /// factor. The old ring remains valid for anyone still holding it.
    pub fn with_replaced_topology(&self, topology: &ClusterTopology) -> Self {
        Self::with_repetitions(topology, self.repetitions)
    }

    /// A new ring with one node added. No-op copy if already present.
    pub fn with_node_added(&self, node: &Endpoint) -> Self {
        if self.nodes.contains(node) {
            return self.clone();
        }
        let topology: ClusterTopology = self
            .nodes
            .iter()
            .cloned()
            .chain(std::iter::once(node.clone()))
            .collect();
        Self::with_repetitions(&topology, self.repetitions)
    }

    /// A new ring with one node removed. No-op copy if absent.
    pub fn with_node_removed(&self, node: &Endpoint) -> Self {
        if !self.nodes.contains(node) {
            return self.clone();
        }
        let topology: ClusterTopology = self
            .nodes
            .iter()
            .filter(|n| *n != node)
            .cloned()
            .collect();
        Self::with_repetitions(&topology, self.repetitions)
    }

    /// Ketama key hash: the first four MD5 digest bytes, little-endian.
    fn hash_key(key: &[u8]) -> u64 {
        let digest = md5::compute(key);
        let bytes = digest.0;
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64
    }
}
