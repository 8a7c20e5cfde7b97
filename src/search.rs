//! Request and result types shared by the cluster, node and index layers.
//!
//! - [`query`] - the structured query tree produced by the query compiler
//! - [`request`] - search/delete requests, sort, group, facet and route specs
//! - [`result`] - per-shard results, merged results and plain responses

pub mod query;
pub mod request;
pub mod result;

pub use query::Query;
pub use request::{
    DeleteRequest, DrillDown, FacetParam, FacetSpec, GroupSpec, IndexRequest, RangeAggregation,
    RangeBucket, RouteParam, RouteTarget, SearchRequest, SearchRequestBuilder, SortField, SortKind,
    SortSpec,
};
pub use result::{
    AggregationResult, FacetResult, Hit, LabelCount, MergedResult, Response, ServiceInfo,
    ShardResult, ShardSummary, SortValue,
};
