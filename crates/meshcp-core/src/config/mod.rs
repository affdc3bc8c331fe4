mod intercp;
mod observability;
mod store;

pub use intercp::{
    CatalogConfig, CertificatesConfig, InterCpConfig, InterCpServerConfig, PoolConfig,
};
pub use observability::ObservabilityConfig;
pub use store::{StoreConfig, StoreType};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};

/// Root configuration for a control-plane instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Identity of this instance.
    #[serde(default)]
    pub instance: InstanceConfig,

    /// Inter-control-plane coordination.
    #[serde(default)]
    pub intercp: InterCpConfig,

    /// Storage backing the catalog.
    #[serde(default)]
    pub store: StoreConfig,

    /// Leader election.
    #[serde(default)]
    pub leader: LeaderConfig,

    /// Logging.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl MeshConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MeshError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content)?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| MeshError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        let catalog = &self.intercp.catalog;
        if catalog.heartbeat_interval_secs == 0 || catalog.writer_interval_secs == 0 {
            return Err(MeshError::Config(
                "intercp.catalog intervals must be greater than zero".to_string(),
            ));
        }
        let pool = &self.intercp.pool;
        if pool.cleanup_interval_secs == 0 || pool.idle_deadline_secs == 0 {
            return Err(MeshError::Config(
                "intercp.pool durations must be greater than zero".to_string(),
            ));
        }
        if self.leader.mode == LeaderMode::Postgres && self.leader.check_interval_secs == 0 {
            return Err(MeshError::Config(
                "leader.check_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.store.store_type == StoreType::Postgres && self.store.url.is_empty() {
            return Err(MeshError::Config(
                "store.url is required for the postgres store".to_string(),
            ));
        }
        if self.leader.mode == LeaderMode::Postgres && self.store.store_type != StoreType::Postgres
        {
            return Err(MeshError::Config(
                "postgres leader election requires the postgres store".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identity of this instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Instance id. Generated from the host name when absent.
    pub id: Option<String>,

    /// Address advertised to peers. Defaults to the host name.
    pub address: Option<String>,
}

/// How leadership is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LeaderMode {
    /// Fixed at startup from `static_leader`.
    #[default]
    Static,

    /// PostgreSQL advisory lock.
    Postgres,
}

/// Leader election configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderConfig {
    /// Election mechanism.
    #[serde(default)]
    pub mode: LeaderMode,

    /// Leadership for the static mode.
    #[serde(default = "default_static_leader")]
    pub static_leader: bool,

    /// How often the lock is (re)checked, in seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Advisory lock id shared by all replicas.
    #[serde(default = "default_lock_id")]
    pub lock_id: i64,
}

impl LeaderConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            mode: LeaderMode::default(),
            static_leader: default_static_leader(),
            check_interval_secs: default_check_interval(),
            lock_id: default_lock_id(),
        }
    }
}

fn default_static_leader() -> bool {
    true
}

fn default_check_interval() -> u64 {
    5
}

fn default_lock_id() -> i64 {
    // "MESH" in hex
    0x4D45_5348_0001
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| MeshError::Internal(e.to_string()))?;

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => result = result.replace(&cap[0], &value),
            Err(_) => tracing::warn!(var = var_name, "Config references unset environment variable"),
        }
    }

    Ok(result)
}
