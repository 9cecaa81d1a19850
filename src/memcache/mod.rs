//! Distributed memcached client subsystem.
//!
//! This is the hard core of the crate: topology-driven reconfiguration of a
//! live cluster client, consistent-hash routing of every key, and the
//! operation pipeline that encodes, dispatches and decodes cache operations
//! against a changing cluster.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               MemcacheProvider              │
//! │   key codec · size gate · sync/async        │
//! └─────────────────────────────────────────────┘
//!                      │ current_client()
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │               ClusterManager                │
//! │   rediscovery loop · generation counter     │
//! └─────────────────────────────────────────────┘
//!                      │ swap on effective change
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │               ClusterClient                 │
//! │   ring routing · per-node connections       │
//! └─────────────────────────────────────────────┘
//!                      │ NodeConnection
//!                      ▼
//!                memcached servers
//! ```

mod client;
mod connection;
mod manager;
mod provider;

pub use client::ClusterClient;
pub use connection::{AsciiConnection, Connector, NodeConnection, TcpConnector};
pub use manager::{ClusterManager, ManagerState};
pub use provider::MemcacheProvider;
