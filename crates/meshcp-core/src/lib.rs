pub mod cluster;
pub mod config;
pub mod error;

pub use cluster::{Instance, LeaderElector, LeadershipFlag};
pub use config::MeshConfig;
pub use error::{MeshError, Result};
