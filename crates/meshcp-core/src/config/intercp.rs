use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Inter-control-plane configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterCpConfig {
    /// Catalog publishing and heartbeats.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Ping server.
    #[serde(default)]
    pub server: InterCpServerConfig,

    /// Client connection pool.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Certificate material.
    #[serde(default)]
    pub certificates: CertificatesConfig,
}

/// Catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Interval between heartbeats sent to the leader, in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Interval between catalog writes by the leader, in seconds.
    #[serde(default = "default_writer_interval")]
    pub writer_interval_secs: u64,
}

impl CatalogConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn writer_interval(&self) -> Duration {
        Duration::from_secs(self.writer_interval_secs)
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            writer_interval_secs: default_writer_interval(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_writer_interval() -> u64 {
    15
}

/// Ping server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterCpServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Serve with mutual TLS. Plaintext is for tests only.
    #[serde(default = "default_true")]
    pub tls_enabled: bool,
}

impl Default for InterCpServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            tls_enabled: true,
        }
    }
}

fn default_port() -> u16 {
    5683
}

fn default_true() -> bool {
    true
}

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connections not used for this long are closed, in seconds.
    #[serde(default = "default_idle_deadline")]
    pub idle_deadline_secs: u64,

    /// How often idle connections are swept, in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Connect timeout for new connections, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl PoolConfig {
    pub fn idle_deadline(&self) -> Duration {
        Duration::from_secs(self.idle_deadline_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_deadline_secs: default_idle_deadline(),
            cleanup_interval_secs: default_cleanup_interval(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_idle_deadline() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5
}

/// PEM files written by the certificate issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificatesConfig {
    #[serde(default = "default_ca_path")]
    pub ca_path: PathBuf,

    #[serde(default = "default_server_cert_path")]
    pub server_cert_path: PathBuf,

    #[serde(default = "default_server_key_path")]
    pub server_key_path: PathBuf,

    #[serde(default = "default_client_cert_path")]
    pub client_cert_path: PathBuf,

    #[serde(default = "default_client_key_path")]
    pub client_key_path: PathBuf,

    /// Attempts before startup gives up on missing material.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts, in milliseconds.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl CertificatesConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            ca_path: default_ca_path(),
            server_cert_path: default_server_cert_path(),
            server_key_path: default_server_key_path(),
            client_cert_path: default_client_cert_path(),
            client_key_path: default_client_key_path(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

fn default_ca_path() -> PathBuf {
    PathBuf::from("/var/run/meshcp/intercp/ca.pem")
}

fn default_server_cert_path() -> PathBuf {
    PathBuf::from("/var/run/meshcp/intercp/server.pem")
}

fn default_server_key_path() -> PathBuf {
    PathBuf::from("/var/run/meshcp/intercp/server.key")
}

fn default_client_cert_path() -> PathBuf {
    PathBuf::from("/var/run/meshcp/intercp/client.pem")
}

fn default_client_key_path() -> PathBuf {
    PathBuf::from("/var/run/meshcp/intercp/client.key")
}

fn default_max_retries() -> u32 {
    60
}

fn default_retry_backoff() -> u64 {
    1000
}
