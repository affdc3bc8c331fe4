mod instance;
mod leadership;

pub use instance::{
    generate_instance_id, join_host_port, Instance, PLAINTEXT_SCHEME, SECURE_SCHEME,
};
pub use leadership::{LeaderElector, LeadershipFlag};
