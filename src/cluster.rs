//! Cluster layer: membership, replica selection and the fan-out router.
//!
//! - [`endpoint`] - `host:port` addresses of nodes
//! - [`membership`] - coordination-service seam and the shard table it feeds
//! - [`channel`] - replica selection for one shard
//! - [`pool`] - bounded worker pools with a queue-wait budget
//! - [`cache`] - single-flight search result cache
//! - [`transport`] - how a router reaches a replica
//! - [`router`] - the cluster-wide entry point

pub mod cache;
pub mod channel;
pub mod endpoint;
pub mod membership;
pub mod pool;
pub mod router;
pub mod transport;

pub use cache::{CacheStats, ResultCache};
pub use channel::{ReplicaSelection, ShardChannel};
pub use endpoint::Endpoint;
pub use membership::{ChangeKind, ChildEvent, Coordinator, MemoryCoordinator, ShardMembership};
pub use pool::WorkerPool;
pub use router::ClusterRouter;
pub use transport::{LocalTransport, ShardHandler, ShardTransport};
