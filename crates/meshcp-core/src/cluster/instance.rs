use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// URL scheme for mutually authenticated inter-control-plane traffic.
pub const SECURE_SCHEME: &str = "grpcs";

/// URL scheme for plaintext inter-control-plane traffic (tests only).
pub const PLAINTEXT_SCHEME: &str = "grpc";

/// Generate an instance id that is unique for the lifetime of this process.
pub fn generate_instance_id(hostname: &str) -> String {
    format!("{}-{}", hostname, Uuid::new_v4().simple())
}

/// One running replica of the control plane as seen in the catalog.
///
/// Equality covers every field, including `leader`: the same process is a
/// different value before and after a leadership change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Unique instance id.
    pub id: String,
    /// Address advertised to peers.
    pub address: String,
    /// Port of the inter-control-plane server.
    pub inter_cp_port: u16,
    /// Whether this entry is the leader.
    #[serde(default)]
    pub leader: bool,
}

impl Instance {
    /// Create a non-leader instance.
    pub fn new(id: impl Into<String>, address: impl Into<String>, inter_cp_port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            inter_cp_port,
            leader: false,
        }
    }

    /// Copy of this instance with the leader flag set.
    pub fn as_leader(&self) -> Self {
        Self {
            leader: true,
            ..self.clone()
        }
    }

    /// Copy of this instance with the leader flag cleared.
    pub fn as_follower(&self) -> Self {
        Self {
            leader: false,
            ..self.clone()
        }
    }

    /// `grpcs://address:port` URL of the inter-control-plane server.
    pub fn inter_cp_url(&self) -> String {
        self.url_with_scheme(SECURE_SCHEME)
    }

    /// URL of the inter-control-plane server with an explicit scheme.
    pub fn url_with_scheme(&self, scheme: &str) -> String {
        format!("{}://{}", scheme, join_host_port(&self.address, self.inter_cp_port))
    }
}

impl std::fmt::Display for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}",
            self.id,
            join_host_port(&self.address, self.inter_cp_port)
        )
    }
}

/// Join host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
