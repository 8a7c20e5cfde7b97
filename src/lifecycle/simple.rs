use std::sync::Arc;

use crate::error::{LindenError, Result};
use crate::index::IndexCore;
use crate::lifecycle::naming::GenerationName;
use crate::lifecycle::{GenerationStore, IndexLifecycle, LifecycleKind};
use crate::search::request::SearchRequest;
use crate::search::result::ShardResult;

/// Exactly one generation, opened at startup and never evicted.
#[derive(Debug)]
pub struct SimpleLifecycle {
    core: Arc<IndexCore>,
}

impl SimpleLifecycle {
    pub fn open(store: GenerationStore) -> Result<Self> {
        store.purge_deleted()?;
        Ok(Self {
            core: store.open(&GenerationName::Simple)?,
        })
    }
}

impl IndexLifecycle for SimpleLifecycle {
    fn kind(&self) -> LifecycleKind {
        LifecycleKind::Simple
    }

    fn search(&self, request: &SearchRequest) -> Result<ShardResult> {
        self.core.search(request)
    }

    fn writer_for(&self, target: Option<&str>) -> Result<Arc<IndexCore>> {
        match target {
            None => Ok(self.core.clone()),
            Some(name) if name == self.core.name() => Ok(self.core.clone()),
            Some(name) => Err(LindenError::invalid_transition(format!(
                "simple lifecycle has no generation '{name}'"
            ))),
        }
    }

    fn generations(&self) -> Vec<Arc<IndexCore>> {
        vec![self.core.clone()]
    }

    fn close(&self) -> Result<()> {
        self.core.close()
    }
}
