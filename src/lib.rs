//! # Linden
//!
//! A distributed search layer over a local index engine.
//!
//! ## Features
//!
//! - Shard fan-out with a bounded wait and replica selection
//! - Global top-K merging of hits, groups, facets and range aggregations
//! - Single-flight result cache
//! - Near-real-time readers and background commits per index generation
//! - Simple, hot-swap and multi-index generation lifecycles
//! - JSON administrative commands

pub mod cluster;
pub mod command;
pub mod config;
mod data;
mod error;
pub mod index;
pub mod lifecycle;
pub mod merge;
pub mod node;
pub mod search;
pub mod service;
mod util;

// Re-exports for the public API
pub use cluster::{
    ClusterRouter, Coordinator, Endpoint, LocalTransport, MemoryCoordinator, ReplicaSelection,
    ShardHandler, ShardTransport,
};
pub use command::Command;
pub use config::{
    CacheConfig, CommitPolicy, Division, LifecycleConfig, LindenConfig, NrtConfig, PoolConfig,
    TimeUnit, TimeoutConfig,
};
pub use data::{DataValue, Document};
pub use error::{LindenError, Result};
pub use index::{BackendRegistry, GenerationState, IndexCore, IndexStats, Schema};
pub use lifecycle::{IndexLifecycle, LifecycleFactory, LifecycleKind};
pub use merge::{ALL_SHARDS_FAILED, HitComparator, ResultMerger};
pub use node::NodeService;
pub use search::{
    DeleteRequest, IndexRequest, MergedResult, Query, Response, RouteParam, SearchRequest,
    SearchRequestBuilder, ServiceInfo, ShardResult,
};
pub use service::LindenService;
pub use util::{shard_for_id, stable_hash};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
