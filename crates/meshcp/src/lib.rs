//! meshcp - inter-control-plane coordination for a replicated mesh control plane
//!
//! The elected leader publishes a catalog of live instances; every other
//! instance finds the leader in that catalog and heartbeats it over mutual TLS.

mod runtime;

#[doc(hidden)]
pub use meshcp_core;
#[doc(hidden)]
pub use meshcp_runtime;

pub use runtime::prelude;
pub use runtime::{connect_store, init_tracing, MeshCp, MeshCpBuilder};
