//! Cluster client manager: periodic topology rediscovery and atomic client
//! replacement.
//!
//! One background task per manager polls the topology source. An effective
//! change (set-inequality) connects a fresh [`ClusterClient`], publishes it
//! atomically, bumps the generation counter and retires the superseded
//! client after a bounded grace period. Everything read on the operation hot
//! path (`current_client`, `generation`) is a plain atomic load.

use crate::config::CacheConfig;
use crate::error::Result;
use crate::memcache::client::ClusterClient;
use crate::memcache::connection::Connector;
use crate::topology::TopologySource;
use crate::types::ClusterTopology;
use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Lifecycle state of a [`ClusterManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Owns the live cluster client and keeps it aligned with the topology
/// source.
pub struct ClusterManager {
    source: Arc<dyn TopologySource>,
    connector: Arc<dyn Connector>,
    config: CacheConfig,

    state: Mutex<ManagerState>,
    topology: ArcSwap<ClusterTopology>,
    client: ArcSwapOption<ClusterClient>,
    generation: AtomicU64,

    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterManager {
    /// Create a stopped manager. Call [`start`](Self::start) to begin
    /// polling.
    pub fn new(
        source: Arc<dyn TopologySource>,
        connector: Arc<dyn Connector>,
        config: CacheConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            connector,
            config,
            state: Mutex::new(ManagerState::Stopped),
            topology: ArcSwap::from_pointee(ClusterTopology::empty()),
            client: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            shutdown_tx: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ManagerState {
        *self.state.lock()
    }

    /// The live client, or `None` while no servers are available. A plain
    /// atomic load, called on every cache operation.
    pub fn current_client(&self) -> Option<Arc<ClusterClient>> {
        self.client.load_full()
    }

    /// The topology the live client was built for.
    pub fn current_topology(&self) -> Arc<ClusterTopology> {
        self.topology.load_full()
    }

    /// Generation counter: incremented exactly once per effective topology
    /// change.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Wait until the generation counter exceeds `generation`. Test and
    /// diagnostic helper; polls with a short sleep.
    pub async fn await_generation_past(&self, generation: u64) {
        while self.generation() <= generation {
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Spawn the rediscovery task and block until its first resolution
    /// attempt completes, so a freshly started manager never hands a null
    /// client to an immediate caller when servers are resolvable.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ManagerState::Stopped {
                return Ok(());
            }
            *state = ManagerState::Starting;
        }

        info!(
            interval_ms = self.config.rediscovery_interval.as_millis() as u64,
            "starting cache cluster manager"
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (ready_tx, ready_rx) = oneshot::channel();
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            manager.run_rediscovery_loop(shutdown_rx, ready_tx).await;
        });

        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.task.lock() = Some(handle);

        // First resolution attempt completing (successfully or not) is the
        // start barrier.
        let _ = ready_rx.await;

        *self.state.lock() = ManagerState::Running;
        info!(
            generation = self.generation(),
            nodes = self.current_topology().len(),
            "cache cluster manager started"
        );
        Ok(())
    }

    async fn run_rediscovery_loop(
        self: Arc<Self>,
        mut shutdown_rx: mpsc::Receiver<()>,
        ready_tx: oneshot::Sender<()>,
    ) {
        let mut interval = tokio::time::interval(self.config.rediscovery_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ready = Some(ready_tx);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("rediscovery task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.refresh().await;
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(());
                    }
                }
            }
        }
    }

    /// One rediscovery run: resolve, compare, and reconfigure if the
    /// topology effectively changed.
    async fn refresh(&self) {
        let resolved = match self.source.resolve().await {
            Ok(topology) => topology,
            Err(err) => {
                warn!(error = %err, "topology resolution failed, keeping current client");
                return;
            }
        };

        let current = self.topology.load_full();
        if *current == resolved {
            trace!(nodes = resolved.len(), "topology unchanged");
            return;
        }

        if resolved.is_empty() {
            if !self.try_publish(&current, ClusterTopology::empty(), None) {
                return;
            }
            info!("topology resolved empty, cache backend unavailable");
            return;
        }

        match ClusterClient::connect(&resolved, &self.connector, &self.config).await {
            Ok(client) => {
                let nodes = resolved.len();
                if !self.try_publish(&current, resolved, Some(Arc::new(client))) {
                    return;
                }
                info!(
                    nodes,
                    generation = self.generation(),
                    "published new cache cluster client"
                );
            }
            Err(err) => {
                // A failed reconnect must not tear down a working client.
                warn!(
                    error = %err,
                    nodes = resolved.len(),
                    "failed to connect to new topology, keeping previous client"
                );
            }
        }
    }

    /// Atomically publish a new topology and client. Returns false if the
    /// topology reference moved underneath us or the manager is stopping, in
    /// which case the prepared client is discarded.
    fn try_publish(
        &self,
        expected: &Arc<ClusterTopology>,
        next: ClusterTopology,
        client: Option<Arc<ClusterClient>>,
    ) -> bool {
        let state = self.state();
        if state == ManagerState::Stopping || state == ManagerState::Stopped {
            self.discard(client);
            return false;
        }

        let previous = self
            .topology
            .compare_and_swap(expected, Arc::new(next));
        if !Arc::ptr_eq(&previous, expected) {
            warn!("concurrent reconfiguration already advanced the topology, discarding result");
            self.discard(client);
            return false;
        }

        let superseded = self.client.swap(client);
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(old) = superseded {
            let grace = self.config.shutdown_grace;
            tokio::spawn(async move {
                old.shutdown(grace).await;
            });
        }
        true
    }

    fn discard(&self, client: Option<Arc<ClusterClient>>) {
        if let Some(client) = client {
            tokio::spawn(async move {
                client.shutdown(Duration::ZERO).await;
            });
        }
    }

    /// Cancel the rediscovery task and close the current client. Further
    /// publications are prevented before the task is torn down.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == ManagerState::Stopped || *state == ManagerState::Stopping {
                return;
            }
            *state = ManagerState::Stopping;
        }

        let shutdown_tx = self.shutdown_tx.lock().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(()).await;
        }
        let task = self.task.lock().take();
        if let Some(handle) = task {
            let _ = handle.await;
        }

        if let Some(client) = self.client.swap(None) {
            client.shutdown(self.config.shutdown_grace).await;
        }
        self.topology.store(Arc::new(ClusterTopology::empty()));

        *self.state.lock() = ManagerState::Stopped;
        info!("cache cluster manager stopped");
    }
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("nodes", &self.current_topology().len())
            .finish()
    }
}
