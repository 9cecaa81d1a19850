//! Tests of the reconfiguration state machine: generation accounting,
//! client replacement, and failure retention.

#[cfg(test)]
mod tests {
    use crate::config::{CacheConfig, CacheKind};
    use crate::memcache::{ClusterManager, ManagerState};
    use crate::testing::utils::{test_endpoints, wait_until, FixedTopologySource, MemoryConnector};
    use crate::types::ClusterTopology;
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> CacheConfig {
        CacheConfig::new(CacheKind::Memcache)
            .with_rediscovery_interval(Duration::from_millis(50))
            .with_shutdown_grace(Duration::from_millis(100))
    }

    fn manager_with(
        topology: ClusterTopology,
    ) -> (
        Arc<ClusterManager>,
        Arc<FixedTopologySource>,
        Arc<MemoryConnector>,
    ) {
        let source = Arc::new(FixedTopologySource::new(topology));
        let connector = Arc::new(MemoryConnector::new());
        let manager = ClusterManager::new(source.clone(), connector.clone(), config());
        (manager, source, connector)
    }

    #[tokio::test]
    async fn test_start_blocks_until_first_resolution() {
        crate::testing::utils::init_test_logging();
        let endpoints = test_endpoints(2);
        let (manager, _source, _connector) = manager_with(endpoints.iter().cloned().collect());

        assert_eq!(manager.state(), ManagerState::Stopped);
        assert!(manager.current_client().is_none());

        manager.start().await.unwrap();

        // Immediately after start the client is live: no null hand-off.
        assert_eq!(manager.state(), ManagerState::Running);
        assert_eq!(manager.generation(), 1);
        let client = manager.current_client().expect("client after start");
        assert_eq!(client.endpoints().len(), 2);

        manager.stop().await;
        assert_eq!(manager.state(), ManagerState::Stopped);
        assert!(manager.current_client().is_none());
    }

    #[tokio::test]
    async fn test_unchanged_topology_is_a_no_op() {
        let endpoints = test_endpoints(3);
        let (manager, _source, _connector) = manager_with(endpoints.iter().cloned().collect());
        manager.start().await.unwrap();

        let generation = manager.generation();
        let client = manager.current_client().unwrap();

        // Several poll cycles with the same resolved set.
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(manager.generation(), generation);
        let same = manager.current_client().unwrap();
        assert!(Arc::ptr_eq(&client, &same), "client must not be rebuilt");

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_effective_change_bumps_generation_once() {
        let endpoints = test_endpoints(3);
        let (manager, source, _connector) = manager_with(endpoints.iter().cloned().collect());
        manager.start().await.unwrap();

        let generation = manager.generation();
        let shrunk: ClusterTopology = endpoints.iter().take(2).cloned().collect();
        source.set(shrunk.clone());

        manager.await_generation_past(generation).await;
        assert_eq!(manager.generation(), generation + 1);
        assert_eq!(*manager.current_topology(), shrunk);

        let client = manager.current_client().expect("client for remaining nodes");
        assert_eq!(client.endpoints().len(), 2);

        // No further bumps while the topology stays put.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.generation(), generation + 1);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_empty_topology_retires_the_client() {
        let endpoints = test_endpoints(2);
        let (manager, source, _connector) = manager_with(endpoints.iter().cloned().collect());
        manager.start().await.unwrap();
        assert!(manager.current_client().is_some());

        let generation = manager.generation();
        source.set(ClusterTopology::empty());
        manager.await_generation_past(generation).await;

        assert!(manager.current_client().is_none());

        // Servers coming back revive the client.
        let generation = manager.generation();
        source.set(endpoints.iter().cloned().collect());
        manager.await_generation_past(generation).await;
        assert!(manager.current_client().is_some());

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_working_client() {
        let endpoints = test_endpoints(3);
        let initial: ClusterTopology = endpoints.iter().take(2).cloned().collect();
        let (manager, source, connector) = manager_with(initial.clone());
        manager.start().await.unwrap();

        let generation = manager.generation();
        let client = manager.current_client().unwrap();

        // Grow the topology by a node that refuses connections.
        connector.set_down(&endpoints[2], true);
        source.set(endpoints.iter().cloned().collect());

        tokio::time::sleep(Duration::from_millis(300)).await;

        // The working client and topology are retained untouched.
        assert_eq!(manager.generation(), generation);
        assert_eq!(*manager.current_topology(), initial);
        assert!(Arc::ptr_eq(&client, &manager.current_client().unwrap()));

        // Once the node accepts connections the next poll succeeds.
        connector.set_down(&endpoints[2], false);
        manager.await_generation_past(generation).await;
        assert_eq!(manager.current_client().unwrap().endpoints().len(), 3);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_resolution_failure_keeps_client() {
        use crate::topology::TopologySource;

        struct FlakySource {
            inner: FixedTopologySource,
            fail: std::sync::atomic::AtomicBool,
        }

        #[async_trait::async_trait]
        impl crate::topology::TopologySource for FlakySource {
            async fn resolve(&self) -> crate::error::Result<ClusterTopology> {
                if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
                    return Err(crate::error::TopologyError::Discovery(
                        "registry unavailable".into(),
                    )
                    .into());
                }
                self.inner.resolve().await
            }
        }

        let endpoints = test_endpoints(2);
        let source = Arc::new(FlakySource {
            inner: FixedTopologySource::new(endpoints.iter().cloned().collect()),
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let connector = Arc::new(MemoryConnector::new());
        let manager = ClusterManager::new(source.clone(), connector, config());
        manager.start().await.unwrap();

        let generation = manager.generation();
        source
            .fail
            .store(true, std::sync::atomic::Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(manager.generation(), generation);
        assert!(manager.current_client().is_some());

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_halts_polling() {
        let endpoints = test_endpoints(1);
        let (manager, source, _connector) = manager_with(endpoints.iter().cloned().collect());

        manager.start().await.unwrap();
        manager.start().await.unwrap();
        assert_eq!(manager.state(), ManagerState::Running);

        manager.stop().await;
        let generation = manager.generation();

        // Topology changes after stop are not observed.
        source.set(ClusterTopology::empty());
        let changed = wait_until(
            || manager.generation() != generation,
            Duration::from_millis(300),
        )
        .await;
        assert!(!changed, "stopped manager must not publish");
    }
}
