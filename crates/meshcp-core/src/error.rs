use std::time::Duration;

use thiserror::Error;

/// Core error type for control-plane coordination.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No leader in catalog")]
    NoLeader,

    #[error("Peer {0} is no longer the leader")]
    NotLeader(String),

    #[error("TLS material has not been configured yet")]
    TlsNotConfigured,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeshError {
    /// Whether the condition is expected and resolves itself on a later interval.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoLeader | Self::NotLeader(_) | Self::TlsNotConfigured | Self::Conflict(_)
        )
    }
}

impl From<serde_json::Error> for MeshError {
    fn from(e: serde_json::Error) -> Self {
        MeshError::Serialization(e.to_string())
    }
}

/// Result type alias using MeshError.
pub type Result<T> = std::result::Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(MeshError::NoLeader.is_recoverable());
        assert!(MeshError::TlsNotConfigured.is_recoverable());
        assert!(MeshError::NotLeader("grpcs://10.0.0.1:5683".into()).is_recoverable());
        assert!(!MeshError::Certificate("missing ca".into()).is_recoverable());
        assert!(!MeshError::Store("down".into()).is_recoverable());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: MeshError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, MeshError::Serialization(_)));
    }
}
