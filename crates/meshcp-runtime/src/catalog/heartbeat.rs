use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use meshcp_core::cluster::{PLAINTEXT_SCHEME, SECURE_SCHEME};
use meshcp_core::{Instance, MeshError, Result};

use super::{leader, Catalog};
use crate::intercp::client::PingClientFn;
use crate::intercp::proto::PingRequest;

/// Heartbeat client configuration.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub interval: Duration,
    /// Address peers with `grpcs://` rather than plaintext `grpc://`.
    pub secure: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            secure: true,
        }
    }
}

struct CachedLeader {
    instance: Instance,
    /// `None` when this instance is the leader.
    url: Option<String>,
}

/// Follower-side loop that keeps the leader informed that this instance is alive.
///
/// The leader is discovered lazily from the catalog and forgotten as soon as a
/// ping fails or the peer answers that it is no longer leader. Only the
/// leader's URL is cached; every ping takes its client from `client_fn`, so a
/// pooled connection stays fresh while in use and is replaced once broken.
pub struct HeartbeatComponent {
    catalog: Arc<dyn Catalog>,
    client_fn: PingClientFn,
    instance: Instance,
    config: HeartbeatConfig,
    leader: Mutex<Option<CachedLeader>>,
    running: AtomicBool,
    ticks: AtomicU64,
}

impl HeartbeatComponent {
    /// Create a new heartbeat component for `instance`.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        client_fn: PingClientFn,
        instance: Instance,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            catalog,
            client_fn,
            instance: instance.as_follower(),
            config,
            leader: Mutex::new(None),
            running: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }

    /// Check if the loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The leader currently believed in, if any.
    pub fn cached_leader(&self) -> Option<Instance> {
        self.leader
            .lock()
            .ok()
            .and_then(|cached| cached.as_ref().map(|c| c.instance.clone()))
    }

    /// One heartbeat round: discover the leader if needed, then ping it.
    pub async fn tick(&self) -> Result<()> {
        let (leader, url) = match self.cached() {
            Some(cached) => cached,
            None => self.connect().await?,
        };

        // An instance never pings itself.
        let Some(url) = url else {
            return Ok(());
        };

        let client = match (self.client_fn)(&url) {
            Ok(client) => client,
            Err(e) => {
                self.disconnect();
                return Err(e);
            }
        };

        match client.ping(self.request(true)).await {
            Ok(response) if response.leader => Ok(()),
            Ok(_) => {
                self.disconnect();
                Err(MeshError::NotLeader(leader.id))
            }
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Ping on every interval until shutdown, then deregister from the leader.
    pub async fn run(&self, shutdown: CancellationToken) {
        let span = tracing::info_span!("heartbeat", instance_id = %self.instance.id);
        async {
            self.running.store(true, Ordering::SeqCst);
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
                        if let Err(e) = self.tick().await {
                            if e.is_recoverable() {
                                tracing::debug!(tick, error = %e, "Heartbeat skipped");
                            } else {
                                tracing::warn!(tick, error = %e, "Heartbeat failed");
                            }
                        }
                    }
                    _ = shutdown.cancelled() => {
                        tracing::info!("Heartbeat client shutting down");
                        break;
                    }
                }
            }

            self.deregister().await;
            self.running.store(false, Ordering::SeqCst);
        }
        .instrument(span)
        .await
    }

    /// Best-effort `ready = false` ping to the cached leader.
    async fn deregister(&self) {
        let Some((leader, Some(url))) = self.cached() else {
            return;
        };

        let client = match (self.client_fn)(&url) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(leader = %leader, error = %e, "Failed to deregister from leader");
                return;
            }
        };

        let ping = client.ping(self.request(false));
        match tokio::time::timeout(self.config.interval, ping).await {
            Ok(Ok(_)) => tracing::debug!(leader = %leader, "Deregistered from leader"),
            Ok(Err(e)) => {
                tracing::warn!(leader = %leader, error = %e, "Failed to deregister from leader")
            }
            Err(_) => tracing::warn!(leader = %leader, "Timed out deregistering from leader"),
        }
    }

    async fn connect(&self) -> Result<(Instance, Option<String>)> {
        let leader = leader(self.catalog.as_ref()).await?;

        let url = if leader.id == self.instance.id {
            None
        } else {
            let scheme = if self.config.secure {
                SECURE_SCHEME
            } else {
                PLAINTEXT_SCHEME
            };
            let url = leader.url_with_scheme(scheme);
            tracing::info!(leader = %leader, url = %url, "Following leader");
            Some(url)
        };

        if let Ok(mut cached) = self.leader.lock() {
            *cached = Some(CachedLeader {
                instance: leader.clone(),
                url: url.clone(),
            });
        }
        Ok((leader, url))
    }

    fn cached(&self) -> Option<(Instance, Option<String>)> {
        let cached = self.leader.lock().ok()?;
        cached.as_ref().map(|c| (c.instance.clone(), c.url.clone()))
    }

    fn disconnect(&self) {
        if let Ok(mut cached) = self.leader.lock() {
            if let Some(previous) = cached.take() {
                tracing::info!(leader = %previous.instance, "Dropped cached leader");
            }
        }
    }

    fn request(&self, ready: bool) -> PingRequest {
        PingRequest {
            instance_id: self.instance.id.clone(),
            address: self.instance.address.clone(),
            inter_cp_port: u32::from(self.instance.inter_cp_port),
            ready,
        }
    }
}

#[cfg(test)]
mod tests {
    use meshcp_core::LeadershipFlag;

    use super::*;
    use crate::catalog::{ConfigCatalog, Heartbeats};
    use crate::intercp::client::{pooled_ping_client_fn, ClientPool, GrpcConnection};
    use crate::intercp::{serve, PingServer};
    use crate::store::MemoryStore;
    use crate::testing::{fake_tls_material, LocalPingClients};

    struct Peer {
        instance: Instance,
        flag: LeadershipFlag,
        heartbeats: Arc<Heartbeats>,
    }

    fn peer(clients: &LocalPingClients, id: &str, address: &str, leader: bool) -> Peer {
        let instance = Instance::new(id, address, 5683);
        let flag = LeadershipFlag::new(leader);
        let heartbeats = Arc::new(Heartbeats::new());
        clients.register(
            &instance.url_with_scheme(SECURE_SCHEME),
            Arc::new(PingServer::new(Arc::new(flag.clone()), heartbeats.clone())),
        );
        Peer {
            instance,
            flag,
            heartbeats,
        }
    }

    fn catalog() -> Arc<ConfigCatalog> {
        Arc::new(ConfigCatalog::new(Arc::new(MemoryStore::new()), "cp-catalog"))
    }

    fn component(
        catalog: Arc<ConfigCatalog>,
        clients: &LocalPingClients,
        instance: Instance,
    ) -> HeartbeatComponent {
        HeartbeatComponent::new(
            catalog,
            clients.client_fn(),
            instance,
            HeartbeatConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_no_leader_is_recoverable() {
        let clients = LocalPingClients::new();
        let hb = component(catalog(), &clients, Instance::new("cp-2", "10.0.0.2", 5683));

        let err = hb.tick().await.unwrap_err();
        assert!(matches!(err, MeshError::NoLeader));
        assert!(err.is_recoverable());
        assert!(hb.cached_leader().is_none());
    }

    #[tokio::test]
    async fn test_pings_leader_from_catalog() {
        let clients = LocalPingClients::new();
        let l1 = peer(&clients, "cp-1", "10.0.0.1", true);
        let catalog = catalog();
        catalog.replace(vec![l1.instance.as_leader()]).await.unwrap();

        let me = Instance::new("cp-2", "10.0.0.2", 5683);
        let hb = component(catalog, &clients, me.clone());
        hb.tick().await.unwrap();

        assert_eq!(hb.cached_leader(), Some(l1.instance.as_leader()));
        assert_eq!(l1.heartbeats.reset_and_collect(), vec![me]);
    }

    #[tokio::test]
    async fn test_never_pings_itself() {
        let clients = LocalPingClients::new();
        let me = peer(&clients, "cp-1", "10.0.0.1", true);
        let catalog = catalog();
        catalog.replace(vec![me.instance.as_leader()]).await.unwrap();

        let hb = component(catalog, &clients, me.instance.clone());
        hb.tick().await.unwrap();
        hb.tick().await.unwrap();

        assert_eq!(hb.cached_leader(), Some(me.instance.as_leader()));
        assert_eq!(clients.pings(&me.instance.inter_cp_url()), 0);
    }

    #[tokio::test]
    async fn test_drops_leader_that_stepped_down() {
        let clients = LocalPingClients::new();
        let l1 = peer(&clients, "cp-1", "10.0.0.1", true);
        let catalog = catalog();
        catalog.replace(vec![l1.instance.as_leader()]).await.unwrap();

        let hb = component(catalog, &clients, Instance::new("cp-3", "10.0.0.3", 5683));
        hb.tick().await.unwrap();

        l1.flag.set(false);
        let err = hb.tick().await.unwrap_err();
        assert!(matches!(err, MeshError::NotLeader(ref id) if id == "cp-1"));
        assert!(hb.cached_leader().is_none());
    }

    #[tokio::test]
    async fn test_drops_leader_on_rpc_failure() {
        let clients = LocalPingClients::new();
        let l1 = peer(&clients, "cp-1", "10.0.0.1", true);
        let catalog = catalog();
        catalog.replace(vec![l1.instance.as_leader()]).await.unwrap();

        let hb = component(catalog, &clients, Instance::new("cp-3", "10.0.0.3", 5683));
        hb.tick().await.unwrap();

        clients.set_failing(&l1.instance.inter_cp_url(), true);
        assert!(hb.tick().await.is_err());
        assert!(hb.cached_leader().is_none());
    }

    #[tokio::test]
    async fn test_drops_leader_that_disappeared() {
        let clients = LocalPingClients::new();
        let l1 = peer(&clients, "cp-1", "10.0.0.1", true);
        let catalog = catalog();
        catalog.replace(vec![l1.instance.as_leader()]).await.unwrap();

        let hb = component(catalog, &clients, Instance::new("cp-3", "10.0.0.3", 5683));
        hb.tick().await.unwrap();

        clients.unregister(&l1.instance.inter_cp_url());
        assert!(matches!(hb.tick().await, Err(MeshError::Rpc(_))));
        assert!(hb.cached_leader().is_none());
    }

    #[tokio::test]
    async fn test_reconnects_to_new_leader_after_handover() {
        let clients = LocalPingClients::new();
        let l1 = peer(&clients, "cp-1", "10.0.0.1", true);
        let l2 = peer(&clients, "cp-2", "10.0.0.2", false);
        let catalog = catalog();
        catalog.replace(vec![l1.instance.as_leader()]).await.unwrap();

        let me = Instance::new("cp-3", "10.0.0.3", 5683);
        let hb = component(catalog.clone(), &clients, me.clone());
        hb.tick().await.unwrap();
        assert_eq!(hb.cached_leader(), Some(l1.instance.as_leader()));

        // Leadership moves to cp-2 and it publishes itself.
        l1.flag.set(false);
        l2.flag.set(true);
        catalog.replace_leader(l2.instance.clone()).await.unwrap();

        // The stale leader answers "not leader".
        assert!(hb.tick().await.is_err());
        // The next tick re-discovers the leader from the catalog.
        hb.tick().await.unwrap();

        assert_eq!(hb.cached_leader(), Some(l2.instance.as_leader()));
        assert_eq!(l2.heartbeats.reset_and_collect(), vec![me]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deregisters_on_shutdown() {
        let clients = LocalPingClients::new();
        let l1 = peer(&clients, "cp-1", "10.0.0.1", true);
        let catalog = catalog();
        catalog.replace(vec![l1.instance.as_leader()]).await.unwrap();

        let hb = Arc::new(component(
            catalog,
            &clients,
            Instance::new("cp-2", "10.0.0.2", 5683),
        ));
        let shutdown = CancellationToken::new();
        let handle = {
            let hb = hb.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { hb.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(hb.is_running());
        assert_eq!(l1.heartbeats.len(), 1);

        shutdown.cancel();
        handle.await.unwrap();

        assert!(!hb.is_running());
        assert!(l1.heartbeats.is_empty());
        assert_eq!(clients.pings(&l1.instance.inter_cp_url()), 2);
    }

    #[tokio::test]
    async fn test_pooled_leader_connection_survives_idle_sweep_while_in_use() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let leader = Instance::new("cp-1", "127.0.0.1", listener.local_addr().unwrap().port());
        let leader_heartbeats = Arc::new(Heartbeats::new());
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(
            listener,
            Arc::new(PingServer::new(
                Arc::new(LeadershipFlag::new(true)),
                leader_heartbeats.clone(),
            )),
            None,
            shutdown.clone(),
        ));

        let pool = Arc::new(ClientPool::new(
            GrpcConnection::connector(Duration::from_secs(2)),
            Duration::from_millis(200),
        ));
        pool.set_tls_config(fake_tls_material());

        let catalog = catalog();
        catalog.replace(vec![leader.as_leader()]).await.unwrap();
        let me = Instance::new("cp-2", "10.0.0.2", 5683);
        let hb = HeartbeatComponent::new(
            catalog,
            pooled_ping_client_fn(pool.clone()),
            me.clone(),
            HeartbeatConfig {
                interval: Duration::from_millis(100),
                secure: false,
            },
        );

        hb.tick().await.unwrap();
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(pool.cleanup(), 0);
            hb.tick().await.unwrap();
        }
        assert_eq!(pool.len(), 1);

        // Once pings stop the connection idles out, and the next ping dials again.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pool.cleanup(), 1);
        assert!(pool.is_empty());

        hb.tick().await.unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(hb.cached_leader(), Some(leader.as_leader()));
        assert_eq!(leader_heartbeats.reset_and_collect(), vec![me]);

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
