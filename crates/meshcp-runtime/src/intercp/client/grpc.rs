use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

use meshcp_core::cluster::{PLAINTEXT_SCHEME, SECURE_SCHEME};
use meshcp_core::{MeshError, Result};

use super::pool::{ConnectivityState, Connection, TlsMaterial};

/// HTTP/2 keepalive ping interval. A peer that stops answering these is
/// treated as gone even when no call is in flight.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Lazily connected gRPC channel to one peer.
///
/// tonic does not expose channel connectivity, so state is derived from the
/// outcome of the calls made over it. `close` drops the channel; calls made
/// afterwards fail without touching the network.
pub struct GrpcConnection {
    url: String,
    channel: Mutex<Option<Channel>>,
    state: AtomicU8,
}

impl GrpcConnection {
    /// Build a connection for a `grpcs://` or `grpc://` URL.
    pub fn connect(url: &str, tls: &TlsMaterial, connect_timeout: Duration) -> Result<Self> {
        let target = PeerUrl::parse(url)?;

        let endpoint = Endpoint::from_shared(target.http_uri())
            .map_err(|e| MeshError::InvalidArgument(format!("{}: {}", url, e)))?
            .connect_timeout(connect_timeout)
            .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
            .keep_alive_timeout(connect_timeout)
            .keep_alive_while_idle(true);

        let endpoint = if target.secure {
            let tls_config = ClientTlsConfig::new()
                .ca_certificate(Certificate::from_pem(&tls.ca_pem))
                .identity(Identity::from_pem(&tls.cert_pem, &tls.key_pem))
                .domain_name(target.host.clone());
            endpoint
                .tls_config(tls_config)
                .map_err(|e| MeshError::Transport(format!("{}: {}", url, e)))?
        } else {
            endpoint
        };

        Ok(Self {
            url: url.to_string(),
            channel: Mutex::new(Some(endpoint.connect_lazy())),
            state: AtomicU8::new(encode(ConnectivityState::Idle)),
        })
    }

    /// Constructor suitable for `ClientPool::new`.
    pub fn connector(
        connect_timeout: Duration,
    ) -> impl Fn(&str, &TlsMaterial) -> Result<Self> + Send + Sync + 'static {
        move |url, tls| Self::connect(url, tls, connect_timeout)
    }

    /// Peer URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Cheap handle for issuing calls. Fails once the connection is closed.
    pub fn channel(&self) -> Result<Channel> {
        let channel = self
            .channel
            .lock()
            .map_err(|_| MeshError::Internal("grpc channel lock poisoned".to_string()))?;
        channel
            .clone()
            .ok_or_else(|| MeshError::Transport(format!("connection to {} is closed", self.url)))
    }

    /// Update the state from the outcome of a call.
    ///
    /// Unreachable peers and expired deadlines both mark the connection
    /// broken so the pool replaces it; application errors leave it usable.
    pub fn record_outcome(&self, error: Option<&tonic::Status>) {
        let next = match error.map(|status| status.code()) {
            Some(tonic::Code::Unavailable)
            | Some(tonic::Code::DeadlineExceeded)
            | Some(tonic::Code::Cancelled) => ConnectivityState::TransientFailure,
            _ => ConnectivityState::Ready,
        };
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if decode(current) == ConnectivityState::Shutdown {
                    None
                } else {
                    Some(encode(next))
                }
            });
    }
}

impl Connection for GrpcConnection {
    fn state(&self) -> ConnectivityState {
        decode(self.state.load(Ordering::SeqCst))
    }

    fn close(&self) -> Result<()> {
        self.state
            .store(encode(ConnectivityState::Shutdown), Ordering::SeqCst);
        // The channel's background worker stops once the last handle is dropped.
        let mut channel = self
            .channel
            .lock()
            .map_err(|_| MeshError::Internal("grpc channel lock poisoned".to_string()))?;
        channel.take();
        Ok(())
    }
}

fn encode(state: ConnectivityState) -> u8 {
    match state {
        ConnectivityState::Idle => 0,
        ConnectivityState::Connecting => 1,
        ConnectivityState::Ready => 2,
        ConnectivityState::TransientFailure => 3,
        ConnectivityState::Shutdown => 4,
    }
}

fn decode(value: u8) -> ConnectivityState {
    match value {
        0 => ConnectivityState::Idle,
        1 => ConnectivityState::Connecting,
        2 => ConnectivityState::Ready,
        3 => ConnectivityState::TransientFailure,
        _ => ConnectivityState::Shutdown,
    }
}

/// `scheme://host:port` split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PeerUrl {
    secure: bool,
    host: String,
    authority: String,
}

impl PeerUrl {
    fn parse(url: &str) -> Result<Self> {
        let (scheme, authority) = url
            .split_once("://")
            .ok_or_else(|| MeshError::InvalidArgument(format!("{} is not a URL", url)))?;

        let secure = match scheme {
            SECURE_SCHEME => true,
            PLAINTEXT_SCHEME => false,
            other => {
                return Err(MeshError::InvalidArgument(format!(
                    "unsupported scheme {} in {}",
                    other, url
                )))
            }
        };

        let authority = authority.trim_end_matches('/');
        let host = match authority.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
                host.trim_start_matches('[').trim_end_matches(']')
            }
            _ => {
                return Err(MeshError::InvalidArgument(format!(
                    "{} has no port",
                    url
                )))
            }
        };
        if host.is_empty() {
            return Err(MeshError::InvalidArgument(format!("{} has no host", url)));
        }

        Ok(Self {
            secure,
            host: host.to_string(),
            authority: authority.to_string(),
        })
    }

    fn http_uri(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}", scheme, self.authority)
    }
}
