//! Catalog of running control-plane instances.
//!
//! The leader republishes the catalog on a fixed interval from the heartbeats
//! it received; every other instance reads it to find the leader.

mod config_catalog;
mod heartbeat;
mod heartbeats;
mod writer;

pub use config_catalog::{CatalogDocument, ConfigCatalog};
pub use heartbeat::{HeartbeatComponent, HeartbeatConfig};
pub use heartbeats::Heartbeats;
pub use writer::{CatalogWriter, WriterConfig, WriterStats, WriterStatsSnapshot};

use std::future::Future;
use std::pin::Pin;

use meshcp_core::{Instance, MeshError, Result};

/// Boxed future returned by catalog operations.
pub type CatalogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Shared, persisted list of instances.
pub trait Catalog: Send + Sync + 'static {
    /// Current snapshot. Empty if nothing has been written yet.
    fn instances(&self) -> CatalogFuture<'_, Vec<Instance>>;

    /// Overwrite the snapshot. Returns false if the stored value was already equal.
    fn replace(&self, instances: Vec<Instance>) -> CatalogFuture<'_, bool>;

    /// Make `leader` the single leader entry, keeping the followers.
    fn replace_leader(&self, leader: Instance) -> CatalogFuture<'_, bool>;

    /// Remove `leader`'s leader entry if it is still present.
    fn drop_leader(&self, leader: Instance) -> CatalogFuture<'_, bool>;
}

/// Find the leader entry of the current snapshot.
pub async fn leader(catalog: &dyn Catalog) -> Result<Instance> {
    let instances = catalog.instances().await?;
    find_leader(&instances).cloned().ok_or(MeshError::NoLeader)
}

/// Find the leader entry in a snapshot.
pub fn find_leader(instances: &[Instance]) -> Option<&Instance> {
    instances.iter().find(|i| i.leader)
}
