mod leader;
mod shutdown;

pub use leader::PgLeaderElection;
pub use shutdown::detached;
