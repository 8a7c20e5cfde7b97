use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data::{DataValue, Document};
use crate::error::{LindenError, Result};
use crate::search::query::Query;

/// How a sort field compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKind {
    /// Relevance score, higher first unless reversed.
    Score,
    /// Index order, lower first unless reversed.
    Doc,
    String,
    Long,
    Double,
}

/// One entry of a sort specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub kind: SortKind,
    #[serde(default)]
    pub reverse: bool,
}

impl SortField {
    pub fn new(field: impl Into<String>, kind: SortKind) -> Self {
        Self {
            field: field.into(),
            kind,
            reverse: false,
        }
    }

    pub fn score() -> Self {
        Self::new("_score", SortKind::Score)
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = !self.reverse;
        self
    }
}

/// Ordered list of sort fields; earlier fields take precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub fields: Vec<SortField>,
}

impl SortSpec {
    pub fn new(fields: Vec<SortField>) -> Self {
        Self { fields }
    }
}

/// Group hits by the value of `field`, keeping at most `inner_limit` hits per group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub field: String,
    pub inner_limit: usize,
}

/// A facet to count over the matching documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetParam {
    /// Name the counts are reported under.
    pub name: String,
    pub field: String,
    pub top_n: usize,
    /// Hierarchical prefix; labels are the next path component below it.
    #[serde(default)]
    pub path: Vec<String>,
}

/// Restrict matches to documents whose `field` lies under `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrillDown {
    pub field: String,
    pub path: Vec<String>,
}

/// One bucket of a range aggregation: `from` inclusive, `to` exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBucket {
    pub label: String,
    pub from: Option<f64>,
    pub to: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeAggregation {
    pub name: String,
    pub field: String,
    pub buckets: Vec<RangeBucket>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacetSpec {
    #[serde(default)]
    pub params: Vec<FacetParam>,
    #[serde(default)]
    pub drill_down: Vec<DrillDown>,
    /// Count each drilled dimension as if its own drill-down were absent.
    #[serde(default)]
    pub drill_sideways: bool,
    #[serde(default)]
    pub ranges: Vec<RangeAggregation>,
}

/// A shard to consult and an optional early-termination override for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTarget {
    pub shard_id: u32,
    pub terminate_after: Option<u64>,
}

/// Explicit shard routing. Empty means every shard with default replica selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteParam {
    #[serde(default)]
    pub shards: Vec<RouteTarget>,
    /// Requests carrying the same key land on the same replica while
    /// membership is stable.
    pub replica_key: Option<String>,
}

impl RouteParam {
    pub fn shards(ids: &[u32]) -> Self {
        Self {
            shards: ids
                .iter()
                .map(|&shard_id| RouteTarget {
                    shard_id,
                    terminate_after: None,
                })
                .collect(),
            replica_key: None,
        }
    }

    pub fn with_replica_key(mut self, key: impl Into<String>) -> Self {
        self.replica_key = Some(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Early-termination override for `shard_id`, if the route names one.
    pub fn terminate_after_for(&self, shard_id: u32) -> Option<u64> {
        self.shards
            .iter()
            .find(|t| t.shard_id == shard_id)
            .and_then(|t| t.terminate_after)
    }
}

/// A search request. Immutable once dispatched; per-shard copies are derived
/// with [`SearchRequest::for_shard`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: Query,
    pub filter: Option<Query>,
    pub offset: usize,
    pub length: usize,
    pub sort: Option<SortSpec>,
    pub group: Option<GroupSpec>,
    pub facets: Option<FacetSpec>,
    /// Cap on the number of matching documents collected per shard.
    pub terminate_after: Option<u64>,
    pub route: Option<RouteParam>,
    /// Source projection; empty returns every stored field.
    #[serde(default)]
    pub source_fields: Vec<String>,
    #[serde(default)]
    pub fetch_source: bool,
    #[serde(default)]
    pub explain: bool,
    /// Text fields to build snippets for.
    #[serde(default)]
    pub highlight_fields: Vec<String>,
    /// Restrict a multi-index read to these generation names.
    #[serde(default)]
    pub indices: Vec<String>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: Query::MatchAll,
            filter: None,
            offset: 0,
            length: 10,
            sort: None,
            group: None,
            facets: None,
            terminate_after: None,
            route: None,
            source_fields: Vec::new(),
            fetch_source: false,
            explain: false,
            highlight_fields: Vec::new(),
            indices: Vec::new(),
        }
    }
}

impl SearchRequest {
    /// Number of hits (or groups) each shard must return for a correct
    /// global page: `offset + length`.
    pub fn window(&self) -> usize {
        self.offset.saturating_add(self.length)
    }

    /// The copy sent to one shard: pagination widened to `0..offset+length`
    /// and the route's early-termination override applied.
    pub fn for_shard(&self, shard_id: u32) -> SearchRequest {
        let mut request = self.clone();
        request.length = self.window();
        request.offset = 0;
        if let Some(limit) = self
            .route
            .as_ref()
            .and_then(|r| r.terminate_after_for(shard_id))
        {
            request.terminate_after = Some(limit);
        }
        request
    }

    pub fn replica_key(&self) -> Option<&str> {
        self.route.as_ref().and_then(|r| r.replica_key.as_deref())
    }
}

pub struct SearchRequestBuilder {
    request: SearchRequest,
}

impl Default for SearchRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchRequestBuilder {
    pub fn new() -> Self {
        Self {
            request: SearchRequest::default(),
        }
    }

    pub fn query(mut self, query: Query) -> Self {
        self.request.query = query;
        self
    }

    pub fn filter(mut self, filter: Query) -> Self {
        self.request.filter = Some(filter);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.request.offset = offset;
        self
    }

    pub fn length(mut self, length: usize) -> Self {
        self.request.length = length;
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.request.sort = Some(sort);
        self
    }

    pub fn group(mut self, field: impl Into<String>, inner_limit: usize) -> Self {
        self.request.group = Some(GroupSpec {
            field: field.into(),
            inner_limit,
        });
        self
    }

    pub fn facets(mut self, facets: FacetSpec) -> Self {
        self.request.facets = Some(facets);
        self
    }

    pub fn terminate_after(mut self, limit: u64) -> Self {
        self.request.terminate_after = Some(limit);
        self
    }

    pub fn route(mut self, route: RouteParam) -> Self {
        self.request.route = Some(route);
        self
    }

    pub fn source_fields(mut self, fields: Vec<String>) -> Self {
        self.request.fetch_source = true;
        self.request.source_fields = fields;
        self
    }

    pub fn fetch_source(mut self, fetch: bool) -> Self {
        self.request.fetch_source = fetch;
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.request.explain = explain;
        self
    }

    pub fn highlight(mut self, field: impl Into<String>) -> Self {
        self.request.highlight_fields.push(field.into());
        self
    }

    pub fn indices(mut self, names: Vec<String>) -> Self {
        self.request.indices = names;
        self
    }

    pub fn build(self) -> SearchRequest {
        self.request
    }
}

/// Delete every document matching `query` on the routed shards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub query: Query,
    pub route: Option<RouteParam>,
}

impl DeleteRequest {
    pub fn new(query: Query) -> Self {
        Self { query, route: None }
    }

    pub fn with_route(mut self, route: RouteParam) -> Self {
        self.route = Some(route);
        self
    }
}

/// A document write as it arrives from clients.
///
/// `target` selects the generation on lifecycles that have more than one
/// (`next`, `next_<ts>`, a multi-index key). `shard` pins the write to one
/// shard instead of hashing the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRequest {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub shard: Option<u32>,
    #[serde(default)]
    pub update: bool,
}

impl IndexRequest {
    pub fn parse(raw: &str) -> Result<Self> {
        let request: IndexRequest = serde_json::from_str(raw)
            .map_err(|e| LindenError::invalid_argument(format!("malformed index payload: {e}")))?;
        if request.id.is_empty() {
            return Err(LindenError::invalid_argument(
                "index payload needs a non-empty id",
            ));
        }
        Ok(request)
    }

    pub fn document(&self) -> Document {
        self.fields.iter().fold(Document::new(), |doc, (name, value)| {
            doc.add_field(name.clone(), DataValue::from_json(value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_shard_widens_window_and_applies_override() {
        let route = RouteParam {
            shards: vec![
                RouteTarget {
                    shard_id: 0,
                    terminate_after: None,
                },
                RouteTarget {
                    shard_id: 2,
                    terminate_after: Some(50),
                },
            ],
            replica_key: None,
        };
        let request = SearchRequestBuilder::new()
            .offset(5)
            .length(10)
            .terminate_after(1000)
            .route(route)
            .build();

        let shard0 = request.for_shard(0);
        assert_eq!(shard0.offset, 0);
        assert_eq!(shard0.length, 15);
        assert_eq!(shard0.terminate_after, Some(1000));

        let shard2 = request.for_shard(2);
        assert_eq!(shard2.terminate_after, Some(50));
    }

    #[test]
    fn test_request_serializes_deterministically() {
        let a = SearchRequestBuilder::new()
            .query(Query::term("title", "linden"))
            .group("author", 3)
            .build();
        let b = a.clone();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_index_request_parsing() {
        let request = IndexRequest::parse(
            r#"{"id": "d1", "fields": {"title": "hello", "year": 2020}, "target": "next"}"#,
        )
        .unwrap();
        assert_eq!(request.target.as_deref(), Some("next"));
        assert!(!request.update);
        let doc = request.document();
        assert_eq!(doc.get("year").and_then(|v| v.as_integer()), Some(2020));

        assert!(IndexRequest::parse(r#"{"id": ""}"#).is_err());
        assert!(IndexRequest::parse("not json").is_err());
    }
}
