pub mod catalog;
pub mod cluster;
pub mod intercp;
pub mod store;
pub mod testing;

pub use catalog::{
    Catalog, CatalogWriter, ConfigCatalog, HeartbeatComponent, HeartbeatConfig, Heartbeats,
    WriterConfig, WriterStats,
};
pub use cluster::{detached, PgLeaderElection};
pub use intercp::{pooled_ping_client_fn, ClientPool, GrpcConnection, PingClientFn, PingServer};
pub use store::{MemoryStore, PgStore, ResourceStore};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use meshcp_core::{Instance, LeadershipFlag};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::testing::LocalPingClients;

    #[tokio::test(start_paused = true)]
    async fn test_follower_joins_and_ages_out_of_catalog() {
        let catalog = Arc::new(ConfigCatalog::new(Arc::new(MemoryStore::new()), "cp-catalog"));
        let clients = LocalPingClients::new();

        let i1 = Instance::new("cp-1", "10.0.0.1", 5683);
        let i2 = Instance::new("cp-2", "10.0.0.2", 5683);

        let leadership = LeadershipFlag::new(true);
        let heartbeats = Arc::new(Heartbeats::new());
        clients.register(
            &i1.inter_cp_url(),
            Arc::new(PingServer::new(
                Arc::new(leadership.clone()),
                heartbeats.clone(),
            )),
        );

        let writer = Arc::new(CatalogWriter::new(
            catalog.clone(),
            heartbeats,
            Arc::new(leadership),
            i1.clone(),
            WriterConfig {
                interval: Duration::from_secs(15),
            },
        ));
        let follower = Arc::new(HeartbeatComponent::new(
            catalog.clone(),
            clients.client_fn(),
            i2.clone(),
            HeartbeatConfig {
                interval: Duration::from_secs(4),
                secure: true,
            },
        ));

        let shutdown = CancellationToken::new();
        let writer_task = {
            let writer = writer.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { writer.run(shutdown).await })
        };
        let follower_task = {
            let follower = follower.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { follower.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(15_500)).await;
        assert_eq!(
            catalog.instances().await.unwrap(),
            vec![i1.as_leader(), i2.clone()]
        );

        // Stop heartbeating without a graceful "not ready" ping.
        follower_task.abort();
        let _ = follower_task.await;

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(catalog.instances().await.unwrap(), vec![i1.as_leader()]);

        shutdown.cancel();
        writer_task.await.unwrap();
        assert!(catalog.instances().await.unwrap().is_empty());
    }
}
