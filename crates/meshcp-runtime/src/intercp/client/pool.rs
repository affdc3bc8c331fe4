use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use meshcp_core::{MeshError, Result};

/// Transport state reported by a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Not connected, will connect on use.
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Last use succeeded.
    Ready,
    /// Last use failed at the transport level.
    TransientFailure,
    /// Closed.
    Shutdown,
}

impl ConnectivityState {
    /// Whether the connection must not be handed out again.
    pub fn is_broken(&self) -> bool {
        matches!(self, Self::TransientFailure | Self::Shutdown)
    }
}

/// A connection the pool can hold.
pub trait Connection: Send + Sync + 'static {
    /// Current transport state.
    fn state(&self) -> ConnectivityState;

    /// Release the connection.
    fn close(&self) -> Result<()>;
}

/// CA certificate plus this instance's client identity, all PEM encoded.
#[derive(Clone)]
pub struct TlsMaterial {
    pub ca_pem: Vec<u8>,
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_pem", &self.ca_pem.len())
            .field("cert_pem", &self.cert_pem.len())
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Builds a connection for a peer URL.
pub type ConnectFn<C> = Box<dyn Fn(&str, &TlsMaterial) -> Result<C> + Send + Sync>;

enum TlsState {
    Unconfigured,
    Configured(Arc<TlsMaterial>),
}

struct PooledConnection<C> {
    conn: Arc<C>,
    last_access: Instant,
}

struct PoolState<C> {
    tls: TlsState,
    connections: HashMap<String, PooledConnection<C>>,
}

/// One reusable connection per peer URL.
///
/// Broken connections are replaced on the next `client` call and connections
/// not used within the idle deadline are closed by the cleanup loop.
pub struct ClientPool<C: Connection> {
    connect: ConnectFn<C>,
    idle_deadline: Duration,
    state: Mutex<PoolState<C>>,
}

impl<C: Connection> ClientPool<C> {
    /// Create an unconfigured pool. `client` fails until TLS material is set.
    pub fn new(
        connect: impl Fn(&str, &TlsMaterial) -> Result<C> + Send + Sync + 'static,
        idle_deadline: Duration,
    ) -> Self {
        Self {
            connect: Box::new(connect),
            idle_deadline,
            state: Mutex::new(PoolState {
                tls: TlsState::Unconfigured,
                connections: HashMap::new(),
            }),
        }
    }

    /// Supply TLS material. Safe to call at any time.
    pub fn set_tls_config(&self, material: TlsMaterial) {
        if let Ok(mut state) = self.state.lock() {
            state.tls = TlsState::Configured(Arc::new(material));
        }
    }

    /// Whether TLS material has been supplied.
    pub fn is_configured(&self) -> bool {
        self.lock()
            .map(|s| matches!(s.tls, TlsState::Configured(_)))
            .unwrap_or(false)
    }

    /// Get the connection for `url`, creating or replacing it as needed.
    pub fn client(&self, url: &str) -> Result<Arc<C>> {
        let mut state = self.lock()?;
        let tls = match &state.tls {
            TlsState::Configured(tls) => tls.clone(),
            TlsState::Unconfigured => return Err(MeshError::TlsNotConfigured),
        };

        let now = Instant::now();
        if let Some(pooled) = state.connections.get_mut(url) {
            let conn_state = pooled.conn.state();
            if !conn_state.is_broken() {
                pooled.last_access = now;
                return Ok(pooled.conn.clone());
            }
            tracing::debug!(url = %url, state = ?conn_state, "Replacing broken connection");
        }

        if let Some(stale) = state.connections.remove(url) {
            if let Err(e) = stale.conn.close() {
                tracing::warn!(url = %url, error = %e, "Failed to close broken connection");
            }
        }

        let conn = Arc::new((self.connect)(url, &tls)?);
        state.connections.insert(
            url.to_string(),
            PooledConnection {
                conn: conn.clone(),
                last_access: now,
            },
        );
        Ok(conn)
    }

    /// Close and evict connections idle for longer than the deadline.
    pub fn cleanup(&self) -> usize {
        let Ok(mut state) = self.lock() else {
            return 0;
        };
        let now = Instant::now();
        let expired: Vec<String> = state
            .connections
            .iter()
            .filter(|(_, pooled)| now.duration_since(pooled.last_access) > self.idle_deadline)
            .map(|(url, _)| url.clone())
            .collect();

        for url in &expired {
            if let Some(pooled) = state.connections.remove(url) {
                if let Err(e) = pooled.conn.close() {
                    tracing::warn!(url = %url, error = %e, "Failed to close idle connection");
                }
            }
        }

        if !expired.is_empty() {
            tracing::debug!(closed = expired.len(), "Closed idle connections");
        }
        expired.len()
    }

    /// Sweep idle connections on every tick until shutdown.
    pub async fn start_cleanup(&self, shutdown: CancellationToken, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cleanup();
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("Connection pool cleanup stopped");
                    break;
                }
            }
        }
    }

    /// Number of held connections.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.connections.len()).unwrap_or(0)
    }

    /// Check if no connection is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState<C>>> {
        self.state
            .lock()
            .map_err(|_| MeshError::Internal("connection pool lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_tls_material, FakeConnection, FakeConnector};

    const URL: &str = "grpcs://10.0.0.1:5683";

    fn pool(connector: &FakeConnector) -> ClientPool<FakeConnection> {
        let pool = ClientPool::new(connector.connect_fn(), Duration::from_secs(60));
        pool.set_tls_config(fake_tls_material());
        pool
    }

    #[test]
    fn test_unconfigured_pool_fails_fast() {
        let connector = FakeConnector::new();
        let pool = ClientPool::new(connector.connect_fn(), Duration::from_secs(60));

        assert!(!pool.is_configured());
        assert!(matches!(pool.client(URL), Err(MeshError::TlsNotConfigured)));
        assert_eq!(connector.created(), 0);

        pool.set_tls_config(fake_tls_material());
        assert!(pool.is_configured());
        assert!(pool.client(URL).is_ok());
    }

    #[test]
    fn test_reuses_connection() {
        let connector = FakeConnector::new();
        let pool = pool(&connector);

        let first = pool.client(URL).unwrap();
        let second = pool.client(URL).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.created(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_one_connection_per_url() {
        let connector = FakeConnector::new();
        let pool = pool(&connector);

        let a = pool.client(URL).unwrap();
        let b = pool.client("grpcs://10.0.0.2:5683").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.url(), URL);
        assert_eq!(b.url(), "grpcs://10.0.0.2:5683");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_replaces_failed_connection() {
        let connector = FakeConnector::new();
        let pool = pool(&connector);

        let first = pool.client(URL).unwrap();
        first.set_state(ConnectivityState::TransientFailure);

        let second = pool.client(URL).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_constructor_error_is_returned() {
        let connector = FakeConnector::new();
        let pool = pool(&connector);
        connector.fail_next();

        assert!(pool.client(URL).is_err());
        assert!(pool.is_empty());
        assert!(pool.client(URL).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_evicts_idle_connections() {
        let connector = FakeConnector::new();
        let pool = pool(&connector);

        let first = pool.client(URL).unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(pool.cleanup(), 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(pool.cleanup(), 1);
        assert!(first.is_closed());
        assert!(pool.is_empty());

        let second = pool.client(URL).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_refreshes_idle_deadline() {
        let connector = FakeConnector::new();
        let pool = pool(&connector);

        let first = pool.client(URL).unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        pool.client(URL).unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(pool.cleanup(), 0);
        assert!(!first.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_loop_runs_until_cancelled() {
        let connector = FakeConnector::new();
        let pool = Arc::new(pool(&connector));
        let conn = pool.client(URL).unwrap();

        let shutdown = CancellationToken::new();
        let handle = {
            let pool = pool.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                pool.start_cleanup(shutdown, Duration::from_secs(10)).await;
            })
        };

        tokio::time::sleep(Duration::from_secs(75)).await;
        assert!(conn.is_closed());
        assert!(pool.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
