//! Inter-control-plane RPC: the ping service, its clients and TLS material.

pub mod client;
pub mod proto;
mod server;
mod tls;

pub use client::{
    pooled_ping_client_fn, ClientPool, Connection, ConnectivityState, GrpcConnection,
    GrpcPingClient, PingClient, PingClientFn, TlsMaterial,
};
pub use server::{serve, PingServer};
pub use tls::{
    acquire_with_retry, CertificateBundle, CertificateFuture, CertificateSource, PemFileSource,
};
