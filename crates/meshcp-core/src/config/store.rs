use serde::{Deserialize, Serialize};

/// Storage configuration for the catalog record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backing store.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,

    /// Connection URL (postgres only).
    #[serde(default)]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Pool checkout timeout in seconds.
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_secs: u64,

    /// Name of the record holding the catalog.
    #[serde(default = "default_resource_name")]
    pub resource_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            url: String::new(),
            pool_size: default_pool_size(),
            pool_timeout_secs: default_pool_timeout(),
            resource_name: default_resource_name(),
        }
    }
}

fn default_pool_size() -> u32 {
    5
}

fn default_pool_timeout() -> u64 {
    30
}

fn default_resource_name() -> String {
    "cp-catalog".to_string()
}

/// Backing store kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// In-process map. State is lost on restart.
    #[default]
    Memory,

    /// PostgreSQL table shared by all replicas.
    Postgres,
}
