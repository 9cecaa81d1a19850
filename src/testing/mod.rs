//! Testing utilities for the caching client.
//!
//! Provides an in-memory memcached fleet ([`utils::MemoryConnector`]) and a
//! controllable topology source ([`utils::FixedTopologySource`]) so the full
//! memcache pipeline — routing, reconfiguration, generation tracking — can be
//! exercised without real servers. The integration suites in this module run
//! entirely against those doubles.

pub mod utils;

mod cluster_manager_tests;

pub use utils::{FixedTopologySource, MemoryConnection, MemoryConnector, MemoryServer};
