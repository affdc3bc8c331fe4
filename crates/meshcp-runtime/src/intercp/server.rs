use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};

use meshcp_core::{Instance, LeaderElector, MeshError, Result};

use super::client::TlsMaterial;
use super::proto::inter_cp_ping_service_server::{
    HandlerFuture, InterCpPingService, InterCpPingServiceServer,
};
use super::proto::{PingRequest, PingResponse};
use crate::catalog::Heartbeats;

/// Leader-side ping handler.
pub struct PingServer {
    leadership: Arc<dyn LeaderElector>,
    heartbeats: Arc<Heartbeats>,
}

impl PingServer {
    pub fn new(leadership: Arc<dyn LeaderElector>, heartbeats: Arc<Heartbeats>) -> Self {
        Self {
            leadership,
            heartbeats,
        }
    }

    /// Record the heartbeat and answer with the current leadership status.
    pub fn handle(&self, request: PingRequest) -> Result<PingResponse> {
        if request.instance_id.is_empty() {
            return Err(MeshError::InvalidArgument(
                "instance_id must not be empty".to_string(),
            ));
        }
        let port = u16::try_from(request.inter_cp_port).map_err(|_| {
            MeshError::InvalidArgument(format!(
                "inter_cp_port {} is out of range",
                request.inter_cp_port
            ))
        })?;

        let instance = Instance::new(request.instance_id, request.address, port);
        tracing::trace!(instance = %instance, ready = request.ready, "Received ping");
        if request.ready {
            self.heartbeats.add(instance);
        } else {
            tracing::debug!(instance = %instance, "Instance is going away");
            self.heartbeats.remove(&instance);
        }

        Ok(PingResponse {
            leader: self.leadership.is_leader(),
        })
    }
}

impl InterCpPingService for PingServer {
    fn ping(&self, request: tonic::Request<PingRequest>) -> HandlerFuture<'_> {
        let result = self.handle(request.into_inner());
        Box::pin(async move {
            result
                .map(tonic::Response::new)
                .map_err(|e| tonic::Status::invalid_argument(e.to_string()))
        })
    }
}

/// Serve the ping service on `listener` until `shutdown` fires.
///
/// With `tls` set, clients must present a certificate signed by its CA.
pub async fn serve(
    listener: TcpListener,
    handler: Arc<PingServer>,
    tls: Option<TlsMaterial>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut builder = Server::builder();
    if let Some(tls) = tls {
        let tls_config = ServerTlsConfig::new()
            .identity(Identity::from_pem(&tls.cert_pem, &tls.key_pem))
            .client_ca_root(Certificate::from_pem(&tls.ca_pem));
        builder = builder
            .tls_config(tls_config)
            .map_err(|e| MeshError::Transport(format!("invalid server TLS config: {}", e)))?;
    }

    let addr = listener.local_addr()?;
    tracing::info!(addr = %addr, "Inter-CP server listening");

    builder
        .add_service(InterCpPingServiceServer::from_arc(handler))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.cancelled().await
        })
        .await
        .map_err(|e| MeshError::Transport(e.to_string()))?;

    tracing::info!(addr = %addr, "Inter-CP server stopped");
    Ok(())
}
