//! Merging of per-shard partial results into one globally ordered answer.
//!
//! [`ResultMerger::merge`] is pure: given a request and the shard results
//! that arrived, it returns the merged result and touches nothing else.
//! Inputs are ordered by shard id before merging, so the outcome does not
//! depend on the order shards answered in.

pub mod comparator;

use std::cmp::Ordering;
use std::collections::VecDeque;

use ahash::AHashMap;
use log::warn;

use crate::search::request::SearchRequest;
use crate::search::result::{
    AggregationResult, FacetResult, Hit, LabelCount, MergedResult, ShardResult, ShardSummary,
};

pub use self::comparator::HitComparator;

/// Error text of a merged result when no shard produced a usable answer.
pub const ALL_SHARDS_FAILED: &str = "all shards failed";

pub struct ResultMerger;

impl ResultMerger {
    /// Merge `results` for `request`.
    pub fn merge(request: &SearchRequest, mut results: Vec<ShardResult>) -> MergedResult {
        results.sort_by_key(|r| r.shard_id);
        let total = results.len();
        let (successes, failures): (Vec<ShardResult>, Vec<ShardResult>) =
            results.into_iter().partition(|r| r.success);

        let summary = ShardSummary {
            total,
            successful: successes.len(),
            failed: failures.len(),
        };

        if successes.is_empty() {
            // A single consulted shard keeps its own error text.
            if let [only] = failures.as_slice() {
                return MergedResult::failed(only.error.clone().unwrap_or_default(), summary);
            }
            let details = describe_failures(&failures);
            warn!("{ALL_SHARDS_FAILED}: {details}");
            return MergedResult::failed(format!("{ALL_SHARDS_FAILED}: {details}"), summary);
        }

        let mut warnings: Vec<String> = successes
            .iter()
            .filter_map(|r| {
                r.warning
                    .as_ref()
                    .map(|w| format!("shard {}: {w}", r.shard_id))
            })
            .collect();
        if !failures.is_empty() {
            let text = format!(
                "{} shards failed: {}",
                failures.len(),
                describe_failures(&failures)
            );
            warn!("partial search result: {text}");
            warnings.insert(0, text);
        }
        let warning = (!warnings.is_empty()).then(|| warnings.join("; "));

        let comparator = HitComparator::new(request.sort.as_ref());
        let terminated_early = successes.iter().any(|r| r.terminated_early);
        let total_hits = successes.iter().map(|r| r.total_hits).sum();

        let facets = merge_facets(request, &successes);
        let aggregations = merge_aggregations(&successes);

        let (hits, total_groups) = if successes.len() == 1 {
            let only = &successes[0];
            let hits = annotate(only.shard_id, only.hits.clone());
            (paginate(hits, request.offset, request.length), only.total_groups)
        } else if request.group.is_some() {
            merge_groups(request, &comparator, &successes)
        } else {
            let lists = successes
                .iter()
                .map(|r| annotate(r.shard_id, r.hits.clone()))
                .collect();
            let merged = k_way_merge(lists, &comparator, request.window());
            (paginate(merged, request.offset, request.length), None)
        };

        MergedResult {
            success: true,
            error: None,
            warning,
            total_hits,
            hits,
            total_groups,
            facets,
            aggregations,
            terminated_early,
            shards: summary,
        }
    }
}

fn describe_failures(failures: &[ShardResult]) -> String {
    failures
        .iter()
        .map(|f| {
            format!(
                "shard {}: {}",
                f.shard_id,
                f.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn annotate(shard_id: u32, mut hits: Vec<Hit>) -> Vec<Hit> {
    for hit in &mut hits {
        hit.shard = Some(shard_id);
        for inner in &mut hit.group_hits {
            inner.shard = Some(shard_id);
        }
    }
    hits
}

fn paginate(hits: Vec<Hit>, offset: usize, length: usize) -> Vec<Hit> {
    hits.into_iter().skip(offset).take(length).collect()
}

/// Merge lists that are each already ordered by `comparator`, keeping at
/// most `limit` hits. On ties the earlier list wins, and within a list the
/// original order is kept.
pub fn k_way_merge(lists: Vec<Vec<Hit>>, comparator: &HitComparator, limit: usize) -> Vec<Hit> {
    let capacity = lists.iter().map(Vec::len).sum::<usize>().min(limit);
    let mut queues: Vec<VecDeque<Hit>> = lists.into_iter().map(VecDeque::from).collect();
    let mut merged = Vec::with_capacity(capacity);

    while merged.len() < limit {
        let mut best: Option<usize> = None;
        for (idx, queue) in queues.iter().enumerate() {
            let Some(candidate) = queue.front() else {
                continue;
            };
            let better = match best.and_then(|b| queues[b].front()) {
                None => true,
                Some(current) => comparator.compare(candidate, current) == Ordering::Less,
            };
            if better {
                best = Some(idx);
            }
        }
        match best.and_then(|idx| queues[idx].pop_front()) {
            Some(hit) => merged.push(hit),
            None => break,
        }
    }
    merged
}

fn merge_groups(
    request: &SearchRequest,
    comparator: &HitComparator,
    successes: &[ShardResult],
) -> (Vec<Hit>, Option<u64>) {
    let inner_limit = request.group.as_ref().map_or(0, |g| g.inner_limit);

    let mut shards = successes.iter();
    let Some(first) = shards.next() else {
        return (Vec::new(), None);
    };
    let mut groups = annotate(first.shard_id, first.hits.clone());
    let mut reported_groups = first.total_groups.unwrap_or(0);

    for shard in shards {
        reported_groups = reported_groups.max(shard.total_groups.unwrap_or(0));
        for incoming in annotate(shard.shard_id, shard.hits.clone()) {
            let existing = groups
                .iter_mut()
                .find(|g| g.group_value == incoming.group_value);
            match existing {
                Some(group) => {
                    let current = std::mem::take(&mut group.group_hits);
                    group.group_hits =
                        k_way_merge(vec![current, incoming.group_hits], comparator, inner_limit);
                    group.group_total += incoming.group_total;
                    if incoming.score > group.score {
                        group.score = incoming.score;
                    }
                }
                None => groups.push(incoming),
            }
        }
    }

    let total_groups = reported_groups.max(groups.len() as u64);
    groups.sort_by(|a, b| b.score.total_cmp(&a.score));
    groups.truncate(request.window());
    (
        paginate(groups, request.offset, request.length),
        Some(total_groups),
    )
}

fn merge_facets(request: &SearchRequest, successes: &[ShardResult]) -> Vec<FacetResult> {
    // Requested params first, in request order, then anything else shards reported.
    let mut order: Vec<(String, Option<usize>)> = request
        .facets
        .as_ref()
        .map(|spec| {
            spec.params
                .iter()
                .map(|p| (p.name.clone(), Some(p.top_n)))
                .collect()
        })
        .unwrap_or_default();
    for result in successes {
        for facet in &result.facets {
            if !order.iter().any(|(name, _)| name == &facet.name) {
                order.push((facet.name.clone(), None));
            }
        }
    }

    order
        .into_iter()
        .filter_map(|(name, top_n)| {
            let mut counts: AHashMap<String, u64> = AHashMap::new();
            let mut child_count = 0u64;
            let mut seen = false;
            for facet in successes
                .iter()
                .flat_map(|r| r.facets.iter())
                .filter(|f| f.name == name)
            {
                seen = true;
                child_count = child_count.max(facet.child_count);
                for entry in &facet.labels {
                    *counts.entry(entry.label.clone()).or_insert(0) += entry.count;
                }
            }
            if !seen {
                return None;
            }
            let mut labels: Vec<LabelCount> = counts
                .into_iter()
                .map(|(label, count)| LabelCount { label, count })
                .collect();
            labels.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| b.label.cmp(&a.label)));
            if let Some(n) = top_n {
                labels.truncate(n);
            }
            Some(FacetResult {
                name,
                child_count,
                labels,
            })
        })
        .collect()
}

fn merge_aggregations(successes: &[ShardResult]) -> Vec<AggregationResult> {
    let mut merged: Vec<AggregationResult> = Vec::new();
    for aggregation in successes.iter().flat_map(|r| r.aggregations.iter()) {
        match merged.iter_mut().find(|m| m.name == aggregation.name) {
            Some(existing) => {
                for (slot, bucket) in existing.buckets.iter_mut().zip(&aggregation.buckets) {
                    slot.count += bucket.count;
                }
            }
            None => merged.push(aggregation.clone()),
        }
    }
    merged
}
