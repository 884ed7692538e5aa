pub mod backend;
pub mod local;
pub mod object;
pub mod uri;

pub use backend::*;
pub use local::LocalReplica;
pub use object::ObjectReplica;
pub use uri::{open_replica, ReplicaLocation, ReplicaOptions};
