//! Query execution of the in-memory backend.
//!
//! Scans documents in index order, scores them against the query tree and
//! collects hits, groups, facet counts and range aggregations for one
//! shard. Results hold at most `offset + length` hits or groups.

use std::collections::BTreeMap;

use ahash::{AHashMap, AHashSet};

use crate::data::{DataValue, Document};
use crate::merge::comparator::HitComparator;
use crate::search::query::Query;
use crate::search::request::{DrillDown, FacetParam, RangeAggregation, SearchRequest, SortKind};
use crate::search::result::{
    AggregationResult, FacetResult, Hit, LabelCount, ShardResult, SortValue,
};

/// A document as seen by the collector: index-order number, external id, fields.
pub struct DocEntry<'a> {
    pub doc: u64,
    pub id: &'a str,
    pub fields: &'a Document,
}

/// Lower-cased alphanumeric tokens of `text`.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Score of `doc` for `query`, or `None` when it does not match.
pub fn score_query(query: &Query, doc: &Document) -> Option<f32> {
    match query {
        Query::MatchAll => Some(1.0),
        Query::Term { field, value } => score_term(doc.get(field)?, value),
        Query::Range {
            field,
            lower,
            upper,
        } => {
            let n = doc.get(field)?.as_number()?;
            let above = lower.is_none_or(|l| n >= l);
            let below = upper.is_none_or(|u| n < u);
            (above && below).then_some(1.0)
        }
        Query::Bool {
            must,
            should,
            must_not,
            filter,
        } => {
            if must.is_empty() && should.is_empty() && filter.is_empty() {
                return None;
            }
            let mut score = 0.0;
            for clause in must {
                score += score_query(clause, doc)?;
            }
            for clause in filter {
                score_query(clause, doc)?;
            }
            if must_not.iter().any(|c| score_query(c, doc).is_some()) {
                return None;
            }
            let mut matched_should = false;
            for clause in should {
                if let Some(s) = score_query(clause, doc) {
                    matched_should = true;
                    score += s;
                }
            }
            if must.is_empty() && filter.is_empty() && !matched_should {
                return None;
            }
            Some(score)
        }
    }
}

fn score_term(value: &DataValue, term: &str) -> Option<f32> {
    match value {
        DataValue::Text(text) => {
            let wanted: Vec<String> = tokenize(term).collect();
            if wanted.is_empty() {
                return None;
            }
            let mut frequencies: AHashMap<String, u32> = AHashMap::new();
            for token in tokenize(text) {
                *frequencies.entry(token).or_insert(0) += 1;
            }
            let mut score = 0.0;
            for token in &wanted {
                score += *frequencies.get(token)? as f32;
            }
            Some(score)
        }
        other => other.labels().iter().any(|l| l == term).then_some(1.0),
    }
}

fn drill_down_matches(drill: &DrillDown, doc: &Document) -> bool {
    let prefix = drill.path.join("/");
    doc.get(&drill.field).is_some_and(|value| {
        value
            .labels()
            .iter()
            .any(|label| label == &prefix || label.starts_with(&format!("{prefix}/")))
    })
}

fn sort_value(doc: &Document, field: &str, kind: SortKind) -> SortValue {
    let Some(value) = doc.get(field) else {
        return SortValue::Missing;
    };
    match kind {
        SortKind::Long => value
            .as_integer()
            .or_else(|| value.as_number().map(|n| n as i64))
            .map_or(SortValue::Missing, SortValue::Long),
        SortKind::Double => value
            .as_number()
            .map_or(SortValue::Missing, SortValue::Double),
        SortKind::String => value
            .labels()
            .into_iter()
            .next()
            .map_or(SortValue::Missing, SortValue::String),
        SortKind::Score | SortKind::Doc => SortValue::Missing,
    }
}

/// Execute `request` over `docs`, which must be in index order.
pub fn collect<'a>(
    shard_id: u32,
    request: &SearchRequest,
    docs: impl Iterator<Item = DocEntry<'a>>,
) -> ShardResult {
    let comparator = HitComparator::new(request.sort.as_ref());
    let facet_spec = request.facets.clone().unwrap_or_default();
    let mut facet_counts: Vec<FacetCounter> = facet_spec
        .params
        .iter()
        .map(|p| FacetCounter::new(p.clone()))
        .collect();
    let mut range_counts: Vec<Vec<u64>> = facet_spec
        .ranges
        .iter()
        .map(|r| vec![0; r.buckets.len()])
        .collect();

    let mut matches: Vec<(Hit, &'a Document)> = Vec::new();
    let mut terminated_early = false;

    for entry in docs {
        if request
            .terminate_after
            .is_some_and(|limit| matches.len() as u64 >= limit)
        {
            terminated_early = true;
            break;
        }
        let Some(score) = score_query(&request.query, entry.fields) else {
            continue;
        };
        if let Some(filter) = &request.filter {
            if score_query(filter, entry.fields).is_none() {
                continue;
            }
        }

        let drills: Vec<bool> = facet_spec
            .drill_down
            .iter()
            .map(|d| drill_down_matches(d, entry.fields))
            .collect();
        let full_match = drills.iter().all(|ok| *ok);

        for counter in &mut facet_counts {
            let counts_here = if facet_spec.drill_sideways {
                // Ignore only the drill-downs on this facet's own dimension.
                facet_spec
                    .drill_down
                    .iter()
                    .zip(&drills)
                    .all(|(d, ok)| *ok || d.field == counter.param.field)
            } else {
                full_match
            };
            if counts_here {
                counter.add(entry.fields);
            }
        }

        if !full_match {
            continue;
        }

        for (aggregation, counts) in facet_spec.ranges.iter().zip(range_counts.iter_mut()) {
            count_ranges(aggregation, entry.fields, counts);
        }

        let mut hit = Hit::new(entry.id, score, entry.doc);
        for field in comparator.fields() {
            if matches!(field.kind, SortKind::String | SortKind::Long | SortKind::Double) {
                hit.sort_values.insert(
                    field.field.clone(),
                    sort_value(entry.fields, &field.field, field.kind),
                );
            }
        }
        matches.push((hit, entry.fields));
    }

    let total_hits = matches.len() as u64;
    let window = request.window();

    let (hits, total_groups) = match &request.group {
        Some(group) => {
            let (groups, total) = collect_groups(
                request,
                &comparator,
                &group.field,
                group.inner_limit,
                matches,
            );
            (groups, Some(total))
        }
        None => {
            matches.sort_by(|a, b| comparator.compare(&a.0, &b.0));
            matches.truncate(window);
            let hits = matches
                .into_iter()
                .map(|(hit, doc)| decorate(request, hit, doc))
                .collect();
            (hits, None)
        }
    };

    ShardResult {
        shard_id,
        success: true,
        error: None,
        warning: None,
        total_hits,
        hits,
        total_groups,
        facets: facet_counts.into_iter().map(FacetCounter::finish).collect(),
        aggregations: facet_spec
            .ranges
            .iter()
            .zip(range_counts)
            .map(|(aggregation, counts)| AggregationResult {
                name: aggregation.name.clone(),
                buckets: aggregation
                    .buckets
                    .iter()
                    .zip(counts)
                    .map(|(bucket, count)| LabelCount::new(bucket.label.clone(), count))
                    .collect(),
            })
            .collect(),
        terminated_early,
    }
}

fn collect_groups(
    request: &SearchRequest,
    comparator: &HitComparator,
    field: &str,
    inner_limit: usize,
    matches: Vec<(Hit, &Document)>,
) -> (Vec<Hit>, u64) {
    let mut order: Vec<Option<String>> = Vec::new();
    let mut members: AHashMap<Option<String>, Vec<(Hit, &Document)>> = AHashMap::new();
    for (hit, doc) in matches {
        let key = doc.get(field).and_then(|v| v.labels().into_iter().next());
        if !members.contains_key(&key) {
            order.push(key.clone());
        }
        members.entry(key).or_default().push((hit, doc));
    }

    let total_groups = order.len() as u64;
    let mut groups: Vec<Hit> = order
        .into_iter()
        .filter_map(|key| {
            let mut hits = members.remove(&key)?;
            hits.sort_by(|a, b| comparator.compare(&a.0, &b.0));
            let group_total = hits.len() as u64;
            let best_score = hits
                .iter()
                .map(|(h, _)| h.score)
                .fold(f32::NEG_INFINITY, f32::max);
            hits.truncate(inner_limit.max(1));
            let inner: Vec<Hit> = hits
                .into_iter()
                .map(|(hit, doc)| decorate(request, hit, doc))
                .collect();

            let mut head = inner.first()?.clone();
            head.score = best_score;
            head.group_value = key;
            head.group_total = group_total;
            head.group_hits = inner.into_iter().take(inner_limit).collect();
            Some(head)
        })
        .collect();

    groups.sort_by(|a, b| b.score.total_cmp(&a.score));
    groups.truncate(request.window());
    (groups, total_groups)
}

fn decorate(request: &SearchRequest, mut hit: Hit, doc: &Document) -> Hit {
    if request.fetch_source {
        hit.source = Some(doc.project(&request.source_fields));
    }
    if request.explain {
        hit.explanation = Some(explain(&request.query, doc, hit.score));
    }
    for field in &request.highlight_fields {
        let fragments = snippets(&request.query, doc, field);
        if !fragments.is_empty() {
            hit.snippets.insert(field.clone(), fragments);
        }
    }
    hit
}

fn explain(query: &Query, doc: &Document, score: f32) -> String {
    match query {
        Query::Bool {
            must, should, ..
        } => {
            let parts: Vec<String> = must
                .iter()
                .chain(should.iter())
                .filter_map(|clause| {
                    score_query(clause, doc).map(|s| format!("{s} from {}", describe(clause)))
                })
                .collect();
            format!("{score} = sum of [{}]", parts.join(", "))
        }
        other => format!("{score} from {}", describe(other)),
    }
}

fn describe(query: &Query) -> String {
    match query {
        Query::MatchAll => "match_all".to_string(),
        Query::Term { field, value } => format!("term({field}:{value})"),
        Query::Range {
            field,
            lower,
            upper,
        } => format!("range({field}:[{lower:?}, {upper:?}))"),
        Query::Bool { .. } => "bool".to_string(),
    }
}

fn snippets(query: &Query, doc: &Document, field: &str) -> Vec<String> {
    let Some(text) = doc.get(field).and_then(|v| v.as_text()) else {
        return Vec::new();
    };
    let wanted: AHashSet<String> = query
        .terms()
        .into_iter()
        .filter(|(f, _)| *f == field)
        .flat_map(|(_, value)| tokenize(value).collect::<Vec<_>>())
        .collect();
    if wanted.is_empty() {
        return Vec::new();
    }
    text.split_terminator(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|sentence| tokenize(sentence).any(|t| wanted.contains(&t)))
        .map(|sentence| {
            sentence
                .split(' ')
                .map(|word| {
                    let bare: String = tokenize(word).collect();
                    if wanted.contains(&bare) {
                        format!("<em>{word}</em>")
                    } else {
                        word.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn count_ranges(aggregation: &RangeAggregation, doc: &Document, counts: &mut [u64]) {
    let Some(n) = doc.get(&aggregation.field).and_then(|v| v.as_number()) else {
        return;
    };
    for (bucket, count) in aggregation.buckets.iter().zip(counts.iter_mut()) {
        let above = bucket.from.is_none_or(|from| n >= from);
        let below = bucket.to.is_none_or(|to| n < to);
        if above && below {
            *count += 1;
        }
    }
}

struct FacetCounter {
    param: FacetParam,
    counts: BTreeMap<String, u64>,
}

impl FacetCounter {
    fn new(param: FacetParam) -> Self {
        Self {
            param,
            counts: BTreeMap::new(),
        }
    }

    fn add(&mut self, doc: &Document) {
        let Some(value) = doc.get(&self.param.field) else {
            return;
        };
        let depth = self.param.path.len();
        let mut seen: AHashSet<String> = AHashSet::new();
        for label in value.labels() {
            let parts: Vec<&str> = label.split('/').collect();
            if parts.len() <= depth && depth > 0 {
                continue;
            }
            if parts.iter().zip(&self.param.path).any(|(a, b)| a != b) {
                continue;
            }
            let child = if depth == 0 {
                label.clone()
            } else {
                parts[depth].to_string()
            };
            if seen.insert(child.clone()) {
                *self.counts.entry(child).or_insert(0) += 1;
            }
        }
    }

    fn finish(self) -> FacetResult {
        let child_count = self.counts.len() as u64;
        let mut labels: Vec<LabelCount> = self
            .counts
            .into_iter()
            .map(|(label, count)| LabelCount { label, count })
            .collect();
        labels.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| b.label.cmp(&a.label)));
        labels.truncate(self.param.top_n);
        FacetResult {
            name: self.param.name,
            child_count,
            labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::request::{FacetSpec, RangeBucket, SearchRequestBuilder, SortField, SortSpec};

    fn corpus() -> Vec<(String, Document)> {
        vec![
            (
                "1".to_string(),
                Document::new()
                    .add_text("title", "Rust rust systems")
                    .add_keyword("color", "red")
                    .add_keyword("category", "books/tech")
                    .add_integer("price", 30),
            ),
            (
                "2".to_string(),
                Document::new()
                    .add_text("title", "Cooking with rust")
                    .add_keyword("color", "blue")
                    .add_keyword("category", "books/food")
                    .add_integer("price", 10),
            ),
            (
                "3".to_string(),
                Document::new()
                    .add_text("title", "Gardening")
                    .add_keyword("color", "red")
                    .add_keyword("category", "garden")
                    .add_integer("price", 20),
            ),
        ]
    }

    fn run(request: &SearchRequest) -> ShardResult {
        let docs = corpus();
        collect(
            7,
            request,
            docs.iter().enumerate().map(|(n, (id, fields))| DocEntry {
                doc: n as u64,
                id,
                fields,
            }),
        )
    }

    #[test]
    fn test_term_scoring_orders_by_frequency() {
        let request = SearchRequestBuilder::new()
            .query(Query::term("title", "rust"))
            .build();
        let result = run(&request);
        assert_eq!(result.shard_id, 7);
        assert_eq!(result.total_hits, 2);
        assert_eq!(result.hits[0].id, "1");
        assert_eq!(result.hits[0].score, 2.0);
        assert_eq!(result.hits[1].id, "2");
    }

    #[test]
    fn test_window_and_early_termination() {
        let request = SearchRequestBuilder::new().offset(1).length(1).build();
        let result = run(&request);
        assert_eq!(result.total_hits, 3);
        assert_eq!(result.hits.len(), 2);

        let request = SearchRequestBuilder::new().terminate_after(1).build();
        let result = run(&request);
        assert_eq!(result.total_hits, 1);
        assert!(result.terminated_early);
    }

    #[test]
    fn test_sort_by_long_field() {
        let request = SearchRequestBuilder::new()
            .sort(SortSpec::new(vec![SortField::new("price", SortKind::Long)]))
            .build();
        let result = run(&request);
        let ids: Vec<&str> = result.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
        assert_eq!(result.hits[0].sort_values["price"], SortValue::Long(10));
    }

    #[test]
    fn test_grouping_by_keyword() {
        let request = SearchRequestBuilder::new().group("color", 1).build();
        let result = run(&request);
        assert_eq!(result.total_groups, Some(2));
        let red = result
            .hits
            .iter()
            .find(|h| h.group_value.as_deref() == Some("red"))
            .unwrap();
        assert_eq!(red.group_total, 2);
        assert_eq!(red.group_hits.len(), 1);
    }

    #[test]
    fn test_facets_paths_and_drill_sideways() {
        let param = |name: &str, field: &str, path: &[&str]| FacetParam {
            name: name.to_string(),
            field: field.to_string(),
            top_n: 10,
            path: path.iter().map(|p| p.to_string()).collect(),
        };
        let spec = FacetSpec {
            params: vec![param("color", "color", &[]), param("books", "category", &["books"])],
            drill_down: vec![DrillDown {
                field: "color".to_string(),
                path: vec!["red".to_string()],
            }],
            drill_sideways: true,
            ranges: vec![RangeAggregation {
                name: "price".to_string(),
                field: "price".to_string(),
                buckets: vec![
                    RangeBucket {
                        label: "cheap".to_string(),
                        from: None,
                        to: Some(25.0),
                    },
                    RangeBucket {
                        label: "dear".to_string(),
                        from: Some(25.0),
                        to: None,
                    },
                ],
            }],
        };
        let request = SearchRequestBuilder::new().facets(spec).build();
        let result = run(&request);

        // Only red documents match.
        assert_eq!(result.total_hits, 2);

        // Sideways: color counts ignore the color drill-down.
        let color = &result.facets[0];
        assert_eq!(color.child_count, 2);
        assert_eq!(color.labels[0], LabelCount::new("red", 2));
        assert_eq!(color.labels[1], LabelCount::new("blue", 1));

        // Category counts respect it: only "books/tech" is red and under books.
        let books = &result.facets[1];
        assert_eq!(books.labels, vec![LabelCount::new("tech", 1)]);

        let price = &result.aggregations[0];
        assert_eq!(
            price.buckets,
            vec![LabelCount::new("cheap", 1), LabelCount::new("dear", 1)]
        );
    }

    #[test]
    fn test_source_explain_and_snippets() {
        let request = SearchRequestBuilder::new()
            .query(Query::term("title", "rust"))
            .source_fields(vec!["price".to_string()])
            .explain(true)
            .highlight("title")
            .build();
        let result = run(&request);
        let first = &result.hits[0];
        assert_eq!(first.source.as_ref().unwrap().len(), 1);
        assert!(first.explanation.as_ref().unwrap().contains("term(title:rust)"));
        assert_eq!(
            first.snippets["title"],
            vec!["<em>Rust</em> <em>rust</em> systems".to_string()]
        );
    }

    #[test]
    fn test_bool_semantics() {
        let doc = Document::new()
            .add_text("title", "alpha beta")
            .add_integer("n", 5);
        let q = Query::boolean()
            .should(Query::term("title", "alpha"))
            .should(Query::term("title", "gamma"));
        assert_eq!(score_query(&q, &doc), Some(1.0));

        let q = Query::term("title", "alpha").must_not(Query::range("n", Some(1.0), Some(10.0)));
        assert_eq!(score_query(&q, &doc), None);

        assert_eq!(score_query(&Query::boolean(), &doc), None);
    }
}
