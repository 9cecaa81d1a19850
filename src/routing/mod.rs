//! Consistent-hash routing of cache keys to server nodes.

mod ring;
mod router;

pub use ring::{KetamaRing, MAX_SEQUENCE_NODES, RING_REPETITIONS};
pub use router::RingRouter;
