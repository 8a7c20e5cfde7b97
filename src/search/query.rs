use serde::{Deserialize, Serialize};

/// Structured query tree.
///
/// This is the output of the query compiler; Linden only carries it to the
/// shards and hands it to the backend, which decides how it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Query {
    /// Matches every document with a constant score.
    MatchAll,

    /// Matches documents whose `field` contains `value`.
    Term { field: String, value: String },

    /// Numeric range over `field`: `lower` inclusive, `upper` exclusive.
    Range {
        field: String,
        lower: Option<f64>,
        upper: Option<f64>,
    },

    /// Boolean combination. `filter` clauses must match but do not score.
    Bool {
        #[serde(default)]
        must: Vec<Query>,
        #[serde(default)]
        should: Vec<Query>,
        #[serde(default)]
        must_not: Vec<Query>,
        #[serde(default)]
        filter: Vec<Query>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Occur {
    Must,
    Should,
    MustNot,
    Filter,
}

impl Default for Query {
    fn default() -> Self {
        Query::MatchAll
    }
}

impl Query {
    pub fn match_all() -> Self {
        Query::MatchAll
    }

    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn range(field: impl Into<String>, lower: Option<f64>, upper: Option<f64>) -> Self {
        Query::Range {
            field: field.into(),
            lower,
            upper,
        }
    }

    /// Start an empty boolean query; add clauses with [`Query::must`] and friends.
    pub fn boolean() -> Self {
        Query::Bool {
            must: Vec::new(),
            should: Vec::new(),
            must_not: Vec::new(),
            filter: Vec::new(),
        }
    }

    pub fn must(self, clause: Query) -> Self {
        self.push_clause(Occur::Must, clause)
    }

    pub fn should(self, clause: Query) -> Self {
        self.push_clause(Occur::Should, clause)
    }

    pub fn must_not(self, clause: Query) -> Self {
        self.push_clause(Occur::MustNot, clause)
    }

    pub fn filter(self, clause: Query) -> Self {
        self.push_clause(Occur::Filter, clause)
    }

    fn push_clause(self, occur: Occur, clause: Query) -> Self {
        let mut query = match self {
            q @ Query::Bool { .. } => q,
            other => Query::boolean().must(other),
        };
        if let Query::Bool {
            must,
            should,
            must_not,
            filter,
        } = &mut query
        {
            match occur {
                Occur::Must => must.push(clause),
                Occur::Should => should.push(clause),
                Occur::MustNot => must_not.push(clause),
                Occur::Filter => filter.push(clause),
            }
        }
        query
    }

    /// Term values referenced anywhere in scoring positions of the tree,
    /// used to build snippets.
    pub fn terms(&self) -> Vec<(&str, &str)> {
        match self {
            Query::Term { field, value } => vec![(field.as_str(), value.as_str())],
            Query::Bool { must, should, .. } => must
                .iter()
                .chain(should.iter())
                .flat_map(|q| q.terms())
                .collect(),
            _ => Vec::new(),
        }
    }
}
