use std::cmp::Ordering;

use crate::search::request::{SortField, SortKind, SortSpec};
use crate::search::result::{Hit, SortValue};

/// Orders hits the way a request's sort spec asks for.
///
/// With no sort spec hits are ordered by score, highest first. The
/// comparator reports ties as `Equal`; callers that need a total order
/// break ties by shard and then by position in the shard's list, which is
/// the order the engine produced them in.
#[derive(Debug, Clone)]
pub struct HitComparator {
    fields: Vec<SortField>,
}

impl Default for HitComparator {
    fn default() -> Self {
        Self {
            fields: vec![SortField::score()],
        }
    }
}

impl HitComparator {
    pub fn new(sort: Option<&SortSpec>) -> Self {
        match sort {
            Some(spec) if !spec.fields.is_empty() => Self {
                fields: spec.fields.clone(),
            },
            _ => Self::default(),
        }
    }

    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    /// `Less` means `a` ranks before `b`.
    pub fn compare(&self, a: &Hit, b: &Hit) -> Ordering {
        for field in &self.fields {
            let ord = match field.kind {
                SortKind::Score => {
                    let ord = b.score.total_cmp(&a.score);
                    if field.reverse { ord.reverse() } else { ord }
                }
                SortKind::Doc => {
                    let ord = a.doc.cmp(&b.doc);
                    if field.reverse { ord.reverse() } else { ord }
                }
                SortKind::String | SortKind::Long | SortKind::Double => compare_values(
                    a.sort_values.get(&field.field),
                    b.sort_values.get(&field.field),
                    field.reverse,
                ),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

// Missing values sort last in both directions.
fn compare_values(a: Option<&SortValue>, b: Option<&SortValue>, reverse: bool) -> Ordering {
    let a = a.filter(|v| !matches!(v, SortValue::Missing));
    let b = b.filter(|v| !matches!(v, SortValue::Missing));
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = compare_present(a, b);
            if reverse { ord.reverse() } else { ord }
        }
    }
}

fn compare_present(a: &SortValue, b: &SortValue) -> Ordering {
    match (a, b) {
        (SortValue::Long(x), SortValue::Long(y)) => x.cmp(y),
        (SortValue::Double(x), SortValue::Double(y)) => x.total_cmp(y),
        (SortValue::Long(x), SortValue::Double(y)) => (*x as f64).total_cmp(y),
        (SortValue::Double(x), SortValue::Long(y)) => x.total_cmp(&(*y as f64)),
        (SortValue::String(x), SortValue::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &SortValue) -> u8 {
    match value {
        SortValue::Long(_) | SortValue::Double(_) => 0,
        SortValue::String(_) => 1,
        SortValue::Missing => 2,
    }
}
