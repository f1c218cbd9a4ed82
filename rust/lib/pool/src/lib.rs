pub mod config;
pub mod dir;
pub mod error;
pub mod memory;
pub mod traits;

pub use config::{BackendKind, ClusterConfig, connect};
pub use dir::DirCluster;
pub use error::PoolError;
pub use memory::MemCluster;
pub use traits::{Cluster, IoContext, ObjectIter, ObjectStat};
