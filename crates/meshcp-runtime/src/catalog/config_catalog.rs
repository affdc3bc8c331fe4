use std::sync::Arc;

use serde::{Deserialize, Serialize};

use meshcp_core::{Instance, Result};

use super::{Catalog, CatalogFuture};
use crate::store::ResourceStore;

/// Serialized form of the catalog record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub instances: Vec<Instance>,
}

impl CatalogDocument {
    /// Build a document with instances in canonical order, one entry per id.
    ///
    /// Entries sharing an id keep the leader one, otherwise the lowest
    /// address and port.
    pub fn new(mut instances: Vec<Instance>) -> Self {
        instances.sort_by(|a, b| {
            a.id.cmp(&b.id)
                .then(b.leader.cmp(&a.leader))
                .then_with(|| a.address.cmp(&b.address))
                .then(a.inter_cp_port.cmp(&b.inter_cp_port))
        });

        let before = instances.len();
        instances.dedup_by(|later, kept| later.id == kept.id);
        if instances.len() < before {
            tracing::warn!(
                dropped = before - instances.len(),
                "Collapsed catalog entries sharing an instance id"
            );
        }
        Self { instances }
    }

    /// Canonical JSON encoding used for storage and comparison.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored value and bring it into canonical order.
    pub fn decode(value: &str) -> Result<Self> {
        let doc: Self = serde_json::from_str(value)?;
        Ok(Self::new(doc.instances))
    }
}

/// Catalog persisted as a single named record in a resource store.
pub struct ConfigCatalog {
    store: Arc<dyn ResourceStore>,
    resource_name: String,
}

impl ConfigCatalog {
    /// Create a catalog over the given store record.
    pub fn new(store: Arc<dyn ResourceStore>, resource_name: impl Into<String>) -> Self {
        Self {
            store,
            resource_name: resource_name.into(),
        }
    }

    /// Name of the backing record.
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    async fn write(&self, instances: Vec<Instance>) -> Result<bool> {
        let encoded = CatalogDocument::new(instances).encode()?;

        match self.store.get(&self.resource_name).await? {
            None => {
                self.store.create(&self.resource_name, encoded).await?;
                Ok(true)
            }
            Some(existing) => {
                match CatalogDocument::decode(&existing.value).and_then(|doc| doc.encode()) {
                    Ok(current) if current == encoded => return Ok(false),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(
                            resource = %self.resource_name,
                            error = %e,
                            "Stored catalog is unreadable, overwriting"
                        );
                    }
                }
                self.store
                    .update(&self.resource_name, encoded, existing.version)
                    .await?;
                Ok(true)
            }
        }
    }

    async fn read(&self) -> Result<Vec<Instance>> {
        match self.store.get(&self.resource_name).await? {
            Some(record) => Ok(CatalogDocument::decode(&record.value)?.instances),
            None => Ok(Vec::new()),
        }
    }
}

impl Catalog for ConfigCatalog {
    fn instances(&self) -> CatalogFuture<'_, Vec<Instance>> {
        Box::pin(self.read())
    }

    fn replace(&self, instances: Vec<Instance>) -> CatalogFuture<'_, bool> {
        Box::pin(self.write(instances))
    }

    fn replace_leader(&self, leader: Instance) -> CatalogFuture<'_, bool> {
        Box::pin(async move {
            let leader = leader.as_leader();
            let mut instances: Vec<Instance> = self
                .read()
                .await?
                .into_iter()
                .filter(|i| !i.leader && i.id != leader.id)
                .collect();
            instances.push(leader);
            self.write(instances).await
        })
    }

    fn drop_leader(&self, leader: Instance) -> CatalogFuture<'_, bool> {
        Box::pin(async move {
            let leader = leader.as_leader();
            let instances = self.read().await?;
            if !instances.contains(&leader) {
                return Ok(false);
            }
            let remaining = instances.into_iter().filter(|i| *i != leader).collect();
            self.write(remaining).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn catalog() -> (Arc<MemoryStore>, ConfigCatalog) {
        let store = Arc::new(MemoryStore::new());
        let catalog = ConfigCatalog::new(store.clone(), "cp-catalog");
        (store, catalog)
    }

    #[tokio::test]
    async fn test_instances_empty_before_first_write() {
        let (_, catalog) = catalog();
        assert!(catalog.instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_is_idempotent() {
        let (_, catalog) = catalog();
        let instances = vec![
            Instance::new("a", "10.0.0.1", 5683).as_leader(),
            Instance::new("b", "10.0.0.2", 5683),
        ];

        assert!(catalog.replace(instances.clone()).await.unwrap());
        assert_eq!(catalog.instances().await.unwrap(), instances);

        assert!(!catalog.replace(instances.clone()).await.unwrap());
        assert_eq!(catalog.instances().await.unwrap(), instances);
    }

    #[tokio::test]
    async fn test_replace_ignores_input_order() {
        let (store, catalog) = catalog();
        let a = Instance::new("a", "10.0.0.1", 5683).as_leader();
        let b = Instance::new("b", "10.0.0.2", 5683);

        catalog.replace(vec![a.clone(), b.clone()]).await.unwrap();
        assert!(!catalog.replace(vec![b, a]).await.unwrap());
        assert_eq!(store.get("cp-catalog").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_replace_ignores_foreign_formatting() {
        let (store, catalog) = catalog();
        let pretty = r#"{
            "instances": [
                { "leader": true, "interCpPort": 5683, "address": "10.0.0.1", "id": "a" }
            ]
        }"#;
        store.create("cp-catalog", pretty.to_string()).await.unwrap();

        let changed = catalog
            .replace(vec![Instance::new("a", "10.0.0.1", 5683).as_leader()])
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(store.get("cp-catalog").await.unwrap().unwrap().value, pretty);
    }

    #[tokio::test]
    async fn test_replace_keeps_one_entry_per_id() {
        let (store, catalog) = catalog();
        let leader = Instance::new("a", "10.0.0.1", 5683).as_leader();
        let near = Instance::new("b", "10.0.0.2", 5683);
        let far = Instance::new("b", "10.0.0.9", 5683);

        assert!(catalog
            .replace(vec![far.clone(), leader.clone(), near.clone()])
            .await
            .unwrap());
        assert_eq!(
            catalog.instances().await.unwrap(),
            vec![leader.clone(), near.clone()]
        );

        assert!(!catalog.replace(vec![near, leader, far]).await.unwrap());
        assert_eq!(store.get("cp-catalog").await.unwrap().unwrap().version, 1);
    }

    #[test]
    fn test_document_prefers_leader_entry_for_shared_id() {
        let follower = Instance::new("a", "10.0.0.1", 5683);
        let leader = Instance::new("a", "10.0.0.9", 5683).as_leader();

        let doc = CatalogDocument::new(vec![follower, leader.clone()]);
        assert_eq!(doc.instances, vec![leader]);
    }

    #[tokio::test]
    async fn test_replace_leader_clears_previous_leader() {
        let (_, catalog) = catalog();
        let old = Instance::new("a", "10.0.0.1", 5683);
        let new = Instance::new("b", "10.0.0.2", 5683);
        catalog
            .replace(vec![old.as_leader(), new.clone()])
            .await
            .unwrap();

        assert!(catalog.replace_leader(new.clone()).await.unwrap());

        let instances = catalog.instances().await.unwrap();
        assert_eq!(instances, vec![new.as_leader()]);
    }

    #[tokio::test]
    async fn test_replace_leader_keeps_followers() {
        let (_, catalog) = catalog();
        let follower = Instance::new("c", "10.0.0.3", 5683);
        catalog.replace(vec![follower.clone()]).await.unwrap();

        let leader = Instance::new("a", "10.0.0.1", 5683);
        catalog.replace_leader(leader.clone()).await.unwrap();

        let instances = catalog.instances().await.unwrap();
        assert_eq!(instances, vec![leader.as_leader(), follower]);
    }

    #[tokio::test]
    async fn test_drop_leader() {
        let (_, catalog) = catalog();
        let leader = Instance::new("a", "10.0.0.1", 5683);
        let follower = Instance::new("b", "10.0.0.2", 5683);
        catalog
            .replace(vec![leader.as_leader(), follower.clone()])
            .await
            .unwrap();

        assert!(catalog.drop_leader(leader.clone()).await.unwrap());
        assert_eq!(catalog.instances().await.unwrap(), vec![follower]);
        assert!(!catalog.drop_leader(leader).await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_leader_leaves_new_leader_alone() {
        let (_, catalog) = catalog();
        let old = Instance::new("a", "10.0.0.1", 5683);
        let new = Instance::new("b", "10.0.0.2", 5683).as_leader();
        catalog.replace(vec![new.clone()]).await.unwrap();

        assert!(!catalog.drop_leader(old).await.unwrap());
        assert_eq!(catalog.instances().await.unwrap(), vec![new]);
    }
}
