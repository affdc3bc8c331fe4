//! Single binary runtime for one control-plane instance.
//!
//! Wires the inter-CP layer together:
//! - Catalog over the configured resource store
//! - Leadership (static flag or PostgreSQL advisory lock)
//! - Catalog writer and heartbeat client
//! - Connection pool with idle cleanup
//! - Ping server with mutual TLS

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use meshcp_core::cluster::generate_instance_id;
use meshcp_core::config::{LeaderMode, ObservabilityConfig, StoreConfig, StoreType};
use meshcp_core::{Instance, LeaderElector, LeadershipFlag, MeshConfig, MeshError, Result};
use meshcp_runtime::intercp::{
    acquire_with_retry, pooled_ping_client_fn, serve, ClientPool, GrpcConnection, PemFileSource,
    PingServer,
};
use meshcp_runtime::{
    CatalogWriter, ConfigCatalog, HeartbeatComponent, HeartbeatConfig, Heartbeats, MemoryStore,
    PgLeaderElection, PgStore, ResourceStore, WriterConfig,
};

/// Prelude module for common imports.
pub mod prelude {
    pub use meshcp_core::{Instance, LeaderElector, LeadershipFlag, MeshConfig, MeshError, Result};
    pub use meshcp_runtime::catalog::{leader, Catalog};
    pub use meshcp_runtime::intercp::{PingClient, PingClientFn};

    pub use crate::{MeshCp, MeshCpBuilder};
}

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already initialised");
    }
}

/// Build the configured resource store.
///
/// The PostgreSQL store is also returned on its own so leader election can
/// share its pool.
pub async fn connect_store(
    config: &StoreConfig,
) -> Result<(Arc<dyn ResourceStore>, Option<Arc<PgStore>>)> {
    match config.store_type {
        StoreType::Memory => {
            tracing::warn!("Using in-memory store, the catalog is not shared across processes");
            let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
            Ok((store, None))
        }
        StoreType::Postgres => {
            let store = Arc::new(PgStore::from_config(config).await?);
            store.ensure_schema().await?;
            tracing::info!("Connected to store");
            let shared: Arc<dyn ResourceStore> = store.clone();
            Ok((shared, Some(store)))
        }
    }
}

/// The mesh control-plane runtime.
pub struct MeshCp {
    config: MeshConfig,
    instance: Instance,
    shutdown: CancellationToken,
}

impl MeshCp {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> MeshCpBuilder {
        MeshCpBuilder::new()
    }

    /// This instance, as advertised to peers.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Get the configuration.
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Token cancelled when the runtime shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until Ctrl-C or `shutdown`.
    pub async fn run(self) -> Result<()> {
        let span = tracing::info_span!("meshcp", instance_id = %self.instance.id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> Result<()> {
        tracing::info!(instance = %self.instance, "Mesh control plane starting");
        let intercp = &self.config.intercp;
        let shutdown = self.shutdown.clone();
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        let (store, pg_store) = connect_store(&self.config.store).await?;
        let catalog = Arc::new(ConfigCatalog::new(
            store,
            self.config.store.resource_name.clone(),
        ));

        let leadership: Arc<dyn LeaderElector> = match (self.config.leader.mode, &pg_store) {
            (LeaderMode::Static, _) => {
                Arc::new(LeadershipFlag::new(self.config.leader.static_leader))
            }
            (LeaderMode::Postgres, Some(pg_store)) => {
                let election = Arc::new(PgLeaderElection::new(
                    pg_store.pool().clone(),
                    &self.config.leader,
                ));
                {
                    let election = election.clone();
                    let shutdown = shutdown.clone();
                    handles.push(tokio::spawn(
                        async move { election.run(shutdown).await }.in_current_span(),
                    ));
                }
                election
            }
            (LeaderMode::Postgres, None) => {
                return Err(MeshError::Config(
                    "postgres leader election requires the postgres store".to_string(),
                ));
            }
        };

        let heartbeats = Arc::new(Heartbeats::new());

        let pool = Arc::new(ClientPool::new(
            GrpcConnection::connector(intercp.pool.connect_timeout()),
            intercp.pool.idle_deadline(),
        ));
        {
            let pool = pool.clone();
            let shutdown = shutdown.clone();
            let interval = intercp.pool.cleanup_interval();
            handles.push(tokio::spawn(
                async move { pool.start_cleanup(shutdown, interval).await }.in_current_span(),
            ));
        }

        let writer = Arc::new(CatalogWriter::new(
            catalog.clone(),
            heartbeats.clone(),
            leadership.clone(),
            self.instance.clone(),
            WriterConfig {
                interval: intercp.catalog.writer_interval(),
            },
        ));
        let writer_stats = writer.stats();
        {
            let writer = writer.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(
                async move { writer.run(shutdown).await }.in_current_span(),
            ));
        }

        let heartbeat = Arc::new(HeartbeatComponent::new(
            catalog.clone(),
            pooled_ping_client_fn(pool.clone()),
            self.instance.clone(),
            HeartbeatConfig {
                interval: intercp.catalog.heartbeat_interval(),
                secure: intercp.server.tls_enabled,
            },
        ));
        {
            let heartbeat = heartbeat.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(
                async move { heartbeat.run(shutdown).await }.in_current_span(),
            ));
        }

        // Nothing can talk to peers until certificates exist.
        let certificates = PemFileSource::from_config(&intercp.certificates);
        let bundle = tokio::select! {
            bundle = acquire_with_retry(
                &certificates,
                intercp.certificates.max_retries,
                intercp.certificates.retry_backoff(),
            ) => bundle,
            _ = shutdown.cancelled() => Err(MeshError::Certificate(
                "shutdown before certificates were ready".to_string(),
            )),
        };
        let bundle = match bundle {
            Ok(bundle) => bundle,
            Err(e) => {
                shutdown.cancel();
                join_all(handles).await;
                return Err(e);
            }
        };
        pool.set_tls_config(bundle.client_material());

        let addr = format!("0.0.0.0:{}", intercp.server.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                shutdown.cancel();
                join_all(handles).await;
                return Err(MeshError::Transport(format!("failed to bind {}: {}", addr, e)));
            }
        };
        let server_tls = if intercp.server.tls_enabled {
            Some(bundle.server_material())
        } else {
            tracing::warn!("Inter-CP server TLS disabled, use for testing only");
            None
        };
        {
            let handler = Arc::new(PingServer::new(leadership.clone(), heartbeats));
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(
                async move {
                    if let Err(e) = serve(listener, handler, server_tls, shutdown).await {
                        tracing::error!(error = %e, "Inter-CP server failed");
                    }
                }
                .in_current_span(),
            ));
        }

        tracing::info!(
            instance_id = %self.instance.id,
            port = intercp.server.port,
            "Mesh control plane started"
        );

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Received shutdown notification");
            }
        }

        tracing::info!("Starting graceful shutdown...");
        shutdown.cancel();
        join_all(handles).await;

        tracing::info!(stats = ?writer_stats.snapshot(), "Catalog writer stats");
        if let Some(pg_store) = pg_store {
            pg_store.close().await;
        }
        tracing::info!("Mesh control plane stopped");
        Ok(())
    }
}

async fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task failed");
        }
    }
}

/// Builder for configuring the runtime.
pub struct MeshCpBuilder {
    config: Option<MeshConfig>,
    hostname: Option<String>,
}

impl MeshCpBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            hostname: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: MeshConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the host name used for the default id and address.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Build the runtime.
    pub fn build(self) -> Result<MeshCp> {
        let config = self
            .config
            .ok_or_else(|| MeshError::Config("Configuration is required".to_string()))?;
        config.validate()?;

        let hostname = self.hostname.unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "localhost".to_string())
        });

        let id = config
            .instance
            .id
            .clone()
            .unwrap_or_else(|| generate_instance_id(&hostname));
        let address = config.instance.address.clone().unwrap_or(hostname);
        let instance = Instance::new(id, address, config.intercp.server.port);

        Ok(MeshCp {
            config,
            instance,
            shutdown: CancellationToken::new(),
        })
    }
}

impl Default for MeshCpBuilder {
    fn default() -> Self {
        Self::new()
    }
}
