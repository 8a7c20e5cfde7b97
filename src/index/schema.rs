use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a field is handled by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldOptions {
    /// Matched by queries.
    pub indexed: bool,
    /// Returned as part of the source.
    pub stored: bool,
    /// Columnar value usable for sorting, faceting and in-place updates.
    pub doc_values: bool,
}

impl Default for FieldOptions {
    fn default() -> Self {
        FieldOptions {
            indexed: true,
            stored: true,
            doc_values: false,
        }
    }
}

impl FieldOptions {
    /// A field that only lives in doc values: updating it needs no re-analysis.
    pub fn doc_values_only() -> Self {
        FieldOptions {
            indexed: false,
            stored: false,
            doc_values: true,
        }
    }

    pub fn is_doc_values_only(&self) -> bool {
        self.doc_values && !self.indexed && !self.stored
    }
}

/// Field options by name. Fields not listed are indexed and stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldOptions>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn field(&self, name: &str) -> FieldOptions {
        self.fields.get(name).copied().unwrap_or_default()
    }

    /// True when every named field is doc-values only.
    pub fn all_doc_values_only<'a>(&self, mut names: impl Iterator<Item = &'a String>) -> bool {
        let mut any = false;
        let all = names.all(|name| {
            any = true;
            self.field(name).is_doc_values_only()
        });
        any && all
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: BTreeMap<String, FieldOptions>,
}

impl SchemaBuilder {
    pub fn add_field(mut self, name: impl Into<String>, options: FieldOptions) -> Self {
        self.fields.insert(name.into(), options);
        self
    }

    pub fn build(self) -> Schema {
        Schema {
            fields: self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_values_only_detection() {
        let schema = Schema::builder()
            .add_field("popularity", FieldOptions::doc_values_only())
            .add_field("title", FieldOptions::default())
            .build();

        let only_dv = vec!["popularity".to_string()];
        let mixed = vec!["popularity".to_string(), "title".to_string()];
        let unknown = vec!["other".to_string()];
        let none: Vec<String> = Vec::new();

        assert!(schema.all_doc_values_only(only_dv.iter()));
        assert!(!schema.all_doc_values_only(mixed.iter()));
        assert!(!schema.all_doc_values_only(unknown.iter()));
        assert!(!schema.all_doc_values_only(none.iter()));
    }
}
