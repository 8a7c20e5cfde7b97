use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The value type for fields in a document.
///
/// Text is full-text matched by the backend, `String` and `List` values
/// are matched exactly and are the natural facet and group fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),

    /// String content typically used for keywords, IDs, or non-tokenized metadata.
    String(String),

    /// Text content to be full-text indexed.
    Text(String),

    /// List of values (e.g. tags).
    List(Vec<String>),

    /// Date and time in UTC.
    DateTime(chrono::DateTime<chrono::Utc>),

    /// Geographical point (latitude, longitude).
    Geo(f64, f64),
}

impl DataValue {
    /// Returns the text value if this is a Text or String variant.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataValue::Text(s) | DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer value if this is an Int64 variant.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            DataValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view used by range queries, range aggregations and numeric sorts.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            DataValue::Int64(i) => Some(*i as f64),
            DataValue::Float64(f) => Some(*f),
            DataValue::DateTime(dt) => Some(dt.timestamp_millis() as f64),
            DataValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// The exact-match labels of this value: one per list element, one for
    /// scalars, none for null.
    pub fn labels(&self) -> Vec<String> {
        match self {
            DataValue::Null => Vec::new(),
            DataValue::Bool(b) => vec![b.to_string()],
            DataValue::Int64(i) => vec![i.to_string()],
            DataValue::Float64(f) => vec![f.to_string()],
            DataValue::String(s) | DataValue::Text(s) => vec![s.clone()],
            DataValue::List(items) => items.clone(),
            DataValue::DateTime(dt) => vec![dt.to_rfc3339()],
            DataValue::Geo(lat, lon) => vec![format!("{lat},{lon}")],
        }
    }

    /// Convert a plain JSON value into a field value.
    ///
    /// Strings become `Text`, arrays become `List` (non-string elements are
    /// rendered as JSON), objects are kept as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => DataValue::Null,
            Value::Bool(b) => DataValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => DataValue::Int64(i),
                None => DataValue::Float64(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => DataValue::Text(s.clone()),
            Value::Array(items) => DataValue::List(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::Object(_) => DataValue::String(value.to_string()),
        }
    }
}

// --- Conversions ---

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::Text(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::Text(v.to_string())
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Int64(v)
    }
}

/// A document: a collection of named fields, each containing a [`DataValue`].
///
/// Fields are kept in a `BTreeMap` so that documents serialize identically
/// on every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Field data.
    pub fields: BTreeMap<String, DataValue>,
}

impl Document {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Add a field to the document.
    pub fn add_field(mut self, name: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Add a text field.
    pub fn add_text(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.fields.insert(name.into(), DataValue::Text(text.into()));
        self
    }

    /// Add a keyword field, matched exactly and usable for facets and groups.
    pub fn add_keyword(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields
            .insert(name.into(), DataValue::String(value.into()));
        self
    }

    /// Add an integer field.
    pub fn add_integer(mut self, name: impl Into<String>, value: i64) -> Self {
        self.fields.insert(name.into(), DataValue::Int64(value));
        self
    }

    /// Get a reference to a field's value.
    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.fields.get(name)
    }

    /// Check if the document has a field.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Copy of this document restricted to the given field names.
    /// An empty projection keeps every field.
    pub fn project(&self, names: &[String]) -> Document {
        if names.is_empty() {
            return self.clone();
        }
        Document {
            fields: self
                .fields
                .iter()
                .filter(|(name, _)| names.iter().any(|n| n == *name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    /// Overwrite this document's fields with the ones in `other`.
    pub fn merge_from(&mut self, other: Document) {
        self.fields.extend(other.fields);
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the document is empty.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
