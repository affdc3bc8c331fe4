mod grpc;
mod pool;

pub use grpc::GrpcConnection;
pub use pool::{ClientPool, ConnectFn, Connection, ConnectivityState, TlsMaterial};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use meshcp_core::{MeshError, Result};

use super::proto::inter_cp_ping_service_client::InterCpPingServiceClient;
use super::proto::{PingRequest, PingResponse};

/// Boxed future returned by typed clients.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Typed client for the ping RPC.
pub trait PingClient: Send + Sync {
    fn ping(&self, request: PingRequest) -> ClientFuture<'_, PingResponse>;
}

/// Builds a typed client for a peer URL.
pub type PingClientFn = Arc<dyn Fn(&str) -> Result<Arc<dyn PingClient>> + Send + Sync>;

/// Ping client over a pooled gRPC connection.
pub struct GrpcPingClient {
    conn: Arc<GrpcConnection>,
    timeout: Duration,
}

impl GrpcPingClient {
    /// Default per-call deadline.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(conn: Arc<GrpcConnection>) -> Self {
        Self {
            conn,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl PingClient for GrpcPingClient {
    fn ping(&self, request: PingRequest) -> ClientFuture<'_, PingResponse> {
        Box::pin(async move {
            let mut client = InterCpPingServiceClient::new(self.conn.channel()?);
            let mut request = tonic::Request::new(request);
            request.set_timeout(self.timeout);

            let result = client.ping(request).await;
            self.conn.record_outcome(result.as_ref().err());

            result.map(|r| r.into_inner()).map_err(|status| {
                MeshError::Rpc(format!(
                    "ping {} failed: {} ({:?})",
                    self.conn.url(),
                    status.message(),
                    status.code()
                ))
            })
        })
    }
}

/// Client factory on top of the pool, for any subsystem that talks to a peer.
pub fn pooled_ping_client_fn(pool: Arc<ClientPool<GrpcConnection>>) -> PingClientFn {
    Arc::new(move |url: &str| {
        let conn = pool.client(url)?;
        Ok(Arc::new(GrpcPingClient::new(conn)) as Arc<dyn PingClient>)
    })
}
