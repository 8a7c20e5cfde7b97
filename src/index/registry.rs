//! Factory for index backends, keyed by name.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{LindenError, Result};
use crate::index::backend::IndexWriter;
use crate::index::memory::MemoryIndexWriter;
use crate::index::schema::Schema;

/// Name of the built-in in-memory backend.
pub const MEMORY_BACKEND: &str = "memory";

/// Opens a writer over the index stored in a directory.
pub type BackendConstructor =
    Arc<dyn Fn(&Path, &Schema) -> Result<Arc<dyn IndexWriter>> + Send + Sync>;

/// Backends a node can open generations with.
#[derive(Clone)]
pub struct BackendRegistry {
    constructors: BTreeMap<String, BackendConstructor>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(MEMORY_BACKEND, |path: &Path, _schema: &Schema| {
            let writer: Arc<dyn IndexWriter> = Arc::new(MemoryIndexWriter::open(path)?);
            Ok(writer)
        });
        registry
    }
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Register `constructor` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&Path, &Schema) -> Result<Arc<dyn IndexWriter>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Open a writer with the backend registered as `name`.
    pub fn open(&self, name: &str, path: &Path, schema: &Schema) -> Result<Arc<dyn IndexWriter>> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            LindenError::invalid_config(format!("unknown index backend '{name}'"))
        })?;
        constructor(path, schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_backend_is_registered() {
        let dir = TempDir::new().unwrap();
        let registry = BackendRegistry::default();
        assert!(registry.contains(MEMORY_BACKEND));
        let writer = registry
            .open(MEMORY_BACKEND, dir.path(), &Schema::default())
            .unwrap();
        assert_eq!(writer.version(), 0);
    }

    #[test]
    fn test_unknown_backend() {
        let dir = TempDir::new().unwrap();
        let err = BackendRegistry::empty()
            .open("lucene", dir.path(), &Schema::default())
            .unwrap_err();
        assert!(matches!(err, LindenError::InvalidConfig(_)));
    }
}
