use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use meshcp_core::config::CertificatesConfig;
use meshcp_core::{MeshError, Result};

use super::client::TlsMaterial;

/// Boxed future returned by certificate sources.
pub type CertificateFuture<'a> = Pin<Box<dyn Future<Output = Result<CertificateBundle>> + Send + 'a>>;

/// Everything this instance needs for mutual TLS, PEM encoded.
#[derive(Clone)]
pub struct CertificateBundle {
    pub ca_pem: Vec<u8>,
    pub server_cert_pem: Vec<u8>,
    pub server_key_pem: Vec<u8>,
    pub client_cert_pem: Vec<u8>,
    pub client_key_pem: Vec<u8>,
}

impl CertificateBundle {
    /// Identity presented by the ping server.
    pub fn server_material(&self) -> TlsMaterial {
        TlsMaterial {
            ca_pem: self.ca_pem.clone(),
            cert_pem: self.server_cert_pem.clone(),
            key_pem: self.server_key_pem.clone(),
        }
    }

    /// Identity presented by pooled client connections.
    pub fn client_material(&self) -> TlsMaterial {
        TlsMaterial {
            ca_pem: self.ca_pem.clone(),
            cert_pem: self.client_cert_pem.clone(),
            key_pem: self.client_key_pem.clone(),
        }
    }
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("ca_pem", &self.ca_pem.len())
            .field("server_cert_pem", &self.server_cert_pem.len())
            .field("client_cert_pem", &self.client_cert_pem.len())
            .finish_non_exhaustive()
    }
}

/// Supplier of certificate material that may not be ready at startup.
pub trait CertificateSource: Send + Sync {
    /// Fetch the current bundle, or fail with `MeshError::Certificate` if not ready.
    fn fetch(&self) -> CertificateFuture<'_>;
}

/// Reads PEM files written by an external issuer.
#[derive(Debug, Clone)]
pub struct PemFileSource {
    ca_path: PathBuf,
    server_cert_path: PathBuf,
    server_key_path: PathBuf,
    client_cert_path: PathBuf,
    client_key_path: PathBuf,
}

impl PemFileSource {
    pub fn from_config(config: &CertificatesConfig) -> Self {
        Self {
            ca_path: config.ca_path.clone(),
            server_cert_path: config.server_cert_path.clone(),
            server_key_path: config.server_key_path.clone(),
            client_cert_path: config.client_cert_path.clone(),
            client_key_path: config.client_key_path.clone(),
        }
    }
}

async fn read_pem(path: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Err(MeshError::Certificate(format!(
            "{} is empty",
            path.display()
        ))),
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(MeshError::Certificate(
            format!("{} is not ready yet", path.display()),
        )),
        Err(e) => Err(MeshError::Certificate(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

impl CertificateSource for PemFileSource {
    fn fetch(&self) -> CertificateFuture<'_> {
        Box::pin(async move {
            Ok(CertificateBundle {
                ca_pem: read_pem(&self.ca_path).await?,
                server_cert_pem: read_pem(&self.server_cert_path).await?,
                server_key_pem: read_pem(&self.server_key_path).await?,
                client_cert_pem: read_pem(&self.client_cert_path).await?,
                client_key_pem: read_pem(&self.client_key_path).await?,
            })
        })
    }
}

/// Fetch certificates, trying up to `max_attempts` times with a fixed delay.
///
/// Exhausting the attempts is fatal for the caller: nothing in the inter-CP
/// layer can run without identity material.
pub async fn acquire_with_retry(
    source: &dyn CertificateSource,
    max_attempts: u32,
    backoff: Duration,
) -> Result<CertificateBundle> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match source.fetch().await {
            Ok(bundle) => {
                tracing::info!(attempt, "Inter-CP certificates acquired");
                return Ok(bundle);
            }
            Err(e) if attempt < max_attempts => {
                tracing::debug!(attempt, max_attempts, error = %e, "Certificates not available yet");
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                return Err(MeshError::Certificate(format!(
                    "gave up after {} attempts: {}",
                    max_attempts, e
                )));
            }
        }
    }
}
