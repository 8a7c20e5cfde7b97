use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::Document;

/// A value a hit was sorted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortValue {
    /// The document has no value for the field; sorts last.
    Missing,
    Long(i64),
    Double(f64),
    String(String),
}

/// One search hit. In a grouped result each hit is a group head whose
/// members are in `group_hits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    pub score: f32,
    /// Shard-local document number; the engine's natural order.
    pub doc: u64,
    /// Shard the hit came from, filled in by the merger.
    pub shard: Option<u32>,
    #[serde(default)]
    pub sort_values: BTreeMap<String, SortValue>,
    pub group_value: Option<String>,
    #[serde(default)]
    pub group_total: u64,
    #[serde(default)]
    pub group_hits: Vec<Hit>,
    pub distance: Option<f64>,
    pub explanation: Option<String>,
    #[serde(default)]
    pub snippets: BTreeMap<String, Vec<String>>,
    pub source: Option<Document>,
}

impl Hit {
    pub fn new(id: impl Into<String>, score: f32, doc: u64) -> Self {
        Self {
            id: id.into(),
            score,
            doc,
            shard: None,
            sort_values: BTreeMap::new(),
            group_value: None,
            group_total: 0,
            group_hits: Vec::new(),
            distance: None,
            explanation: None,
            snippets: BTreeMap::new(),
            source: None,
        }
    }

    pub fn with_sort_value(mut self, field: impl Into<String>, value: SortValue) -> Self {
        self.sort_values.insert(field.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: String,
    pub count: u64,
}

impl LabelCount {
    pub fn new(label: impl Into<String>, count: u64) -> Self {
        Self {
            label: label.into(),
            count,
        }
    }
}

/// Counts for one requested facet param.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetResult {
    pub name: String,
    /// Number of distinct labels seen before top-N truncation.
    pub child_count: u64,
    pub labels: Vec<LabelCount>,
}

/// Bucket counts for one range aggregation, in request bucket order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub name: String,
    pub buckets: Vec<LabelCount>,
}

/// The partial result of one shard (or one local generation).
///
/// Holds at most `offset + length` hits; pagination is applied only after
/// the global merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardResult {
    pub shard_id: u32,
    pub success: bool,
    pub error: Option<String>,
    /// Partial failure below this shard, e.g. one of its generations.
    #[serde(default)]
    pub warning: Option<String>,
    pub total_hits: u64,
    pub hits: Vec<Hit>,
    pub total_groups: Option<u64>,
    #[serde(default)]
    pub facets: Vec<FacetResult>,
    #[serde(default)]
    pub aggregations: Vec<AggregationResult>,
    #[serde(default)]
    pub terminated_early: bool,
}

impl ShardResult {
    pub fn empty(shard_id: u32) -> Self {
        Self {
            shard_id,
            success: true,
            error: None,
            warning: None,
            total_hits: 0,
            hits: Vec::new(),
            total_groups: None,
            facets: Vec::new(),
            aggregations: Vec::new(),
            terminated_early: false,
        }
    }

    pub fn failed(shard_id: u32, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::empty(shard_id)
        }
    }
}

/// How many shards contributed to a merged result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// The globally ordered, paginated answer to a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedResult {
    pub success: bool,
    pub error: Option<String>,
    /// Set when some, but not all, shards failed.
    pub warning: Option<String>,
    pub total_hits: u64,
    pub hits: Vec<Hit>,
    pub total_groups: Option<u64>,
    pub facets: Vec<FacetResult>,
    pub aggregations: Vec<AggregationResult>,
    pub terminated_early: bool,
    pub shards: ShardSummary,
}

impl MergedResult {
    pub fn failed(error: impl Into<String>, shards: ShardSummary) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            warning: None,
            total_hits: 0,
            hits: Vec::new(),
            total_groups: None,
            facets: Vec::new(),
            aggregations: Vec::new(),
            terminated_early: false,
            shards,
        }
    }
}

impl MergedResult {
    /// Re-shape a node-local merge (across generations) as one shard's result.
    pub fn into_shard_result(self, shard_id: u32) -> ShardResult {
        if !self.success {
            return ShardResult::failed(shard_id, self.error.unwrap_or_default());
        }
        ShardResult {
            shard_id,
            success: true,
            error: None,
            warning: self.warning,
            total_hits: self.total_hits,
            hits: self.hits,
            total_groups: self.total_groups,
            facets: self.facets,
            aggregations: self.aggregations,
            terminated_early: self.terminated_early,
        }
    }
}

/// Outcome of a delete, index or administrative command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub message: String,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Answer to `getServiceInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub node_id: String,
    pub endpoint: String,
    pub version: String,
    pub shard_id: u32,
    pub lifecycle: String,
    pub indexing_paused: bool,
    /// Known shards and their replica endpoints.
    pub shards: BTreeMap<u32, Vec<String>>,
    pub generations: Vec<crate::index::IndexStats>,
}
