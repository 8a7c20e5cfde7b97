use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use crate::config::Division;
use crate::error::{LindenError, Result};
use crate::index::IndexCore;
use crate::lifecycle::naming::{GenerationName, sequence_key, time_key, validate_key};
use crate::lifecycle::{GenerationStore, IndexLifecycle, LifecycleKind};
use crate::merge::ResultMerger;
use crate::search::request::SearchRequest;
use crate::search::result::ShardResult;

/// Source of "now" for time-bucketed generations.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Co-equal generations keyed by a division strategy. Reads fan out over
/// all of them (or a named subset); writes go to the generation the
/// division selects. The oldest key is archived once more than `max_live`
/// generations are open.
#[derive(Debug)]
pub struct MultiIndexLifecycle {
    store: GenerationStore,
    division: Division,
    max_live: usize,
    clock: Arc<dyn Clock>,
    live: RwLock<BTreeMap<String, Arc<IndexCore>>>,
    transitions: Mutex<()>,
}

impl MultiIndexLifecycle {
    pub fn open(
        store: GenerationStore,
        division: Division,
        max_live: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        store.purge_deleted()?;
        let mut live = BTreeMap::new();
        for name in store.scan()? {
            if let GenerationName::Multi(key) = &name {
                live.insert(key.clone(), store.open(&name)?);
            }
        }
        info!("multi index reopened {} generations", live.len());

        let lifecycle = Self {
            store,
            division,
            max_live: max_live.max(1),
            clock,
            live: RwLock::new(live),
            transitions: Mutex::new(()),
        };
        {
            let _guard = lifecycle.transitions.lock();
            lifecycle.evict_over_cap()?;
        }
        Ok(lifecycle)
    }

    /// Keys of the open generations, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.live.read().keys().cloned().collect()
    }

    fn key_of(name: &str) -> &str {
        name.strip_prefix("multi_").unwrap_or(name)
    }

    /// Key the division picks for a write without an explicit target.
    fn default_key(&self) -> Result<String> {
        match &self.division {
            Division::Time { unit } => Ok(time_key(self.clock.now(), *unit)),
            Division::DocCount { max_docs } => {
                let live = self.live.read();
                let Some((key, newest)) = live.iter().next_back() else {
                    return Ok(sequence_key(0));
                };
                if newest.writer_docs() < *max_docs {
                    return Ok(key.clone());
                }
                let seq: u64 = key.parse().map_err(|_| {
                    LindenError::invalid_transition(format!(
                        "generation key '{key}' is not a sequence number"
                    ))
                })?;
                Ok(sequence_key(seq + 1))
            }
            Division::Named => Err(LindenError::invalid_argument(
                "writes to a named multi index must name their target generation",
            )),
        }
    }

    fn get_or_create(&self, key: &str) -> Result<Arc<IndexCore>> {
        if let Some(core) = self.live.read().get(key) {
            return Ok(core.clone());
        }

        let _guard = self.transitions.lock();
        if let Some(core) = self.live.read().get(key) {
            return Ok(core.clone());
        }
        let core = self.store.open(&GenerationName::Multi(key.to_string()))?;
        self.live.write().insert(key.to_string(), core.clone());
        info!("created generation multi_{key}");
        self.evict_over_cap()?;

        // The new key may itself have been the oldest.
        self.live.read().get(key).cloned().ok_or_else(|| {
            LindenError::invalid_transition(format!(
                "generation multi_{key} is older than every live generation"
            ))
        })
    }

    // Caller holds the transition lock.
    fn evict_over_cap(&self) -> Result<()> {
        loop {
            let evicted = {
                let mut live = self.live.write();
                if live.len() <= self.max_live {
                    return Ok(());
                }
                live.pop_first()
            };
            if let Some((key, core)) = evicted {
                info!("evicting oldest generation multi_{key}");
                self.store.archive(&core, &GenerationName::Multi(key))?;
            }
        }
    }
}

impl IndexLifecycle for MultiIndexLifecycle {
    fn kind(&self) -> LifecycleKind {
        LifecycleKind::MultiIndex
    }

    fn search(&self, request: &SearchRequest) -> Result<ShardResult> {
        let targets: Vec<Arc<IndexCore>> = {
            let live = self.live.read();
            if request.indices.is_empty() {
                live.values().cloned().collect()
            } else {
                request
                    .indices
                    .iter()
                    .map(|name| {
                        validate_key(Self::key_of(name))?;
                        live.get(Self::key_of(name)).cloned().ok_or_else(|| {
                            LindenError::invalid_transition(format!(
                                "unknown generation '{name}'"
                            ))
                        })
                    })
                    .collect::<Result<_>>()?
            }
        };
        if targets.is_empty() {
            return Ok(ShardResult::empty(0));
        }

        let mut widened = request.clone();
        widened.length = request.window();
        widened.offset = 0;

        let results = targets
            .iter()
            .enumerate()
            .map(|(n, core)| {
                let n = n as u32;
                match core.search(&widened) {
                    Ok(mut result) => {
                        result.shard_id = n;
                        result
                    }
                    Err(e) => ShardResult::failed(n, format!("{}: {e}", core.name())),
                }
            })
            .collect();

        let merged = ResultMerger::merge(&widened, results);
        if let Some(warning) = &merged.warning {
            warn!("partial multi index search: {warning}");
        }
        let mut result = merged.into_shard_result(0);
        for hit in &mut result.hits {
            hit.shard = None;
        }
        Ok(result)
    }

    fn writer_for(&self, target: Option<&str>) -> Result<Arc<IndexCore>> {
        let key = match target {
            Some(name) => Self::key_of(name).to_string(),
            None => self.default_key()?,
        };
        validate_key(&key)?;
        self.get_or_create(&key)
    }

    fn generations(&self) -> Vec<Arc<IndexCore>> {
        self.live.read().values().cloned().collect()
    }

    fn delete_generation(&self, name: &str) -> Result<()> {
        let key = Self::key_of(name);
        validate_key(key)?;
        let _guard = self.transitions.lock();
        let core = self
            .live
            .write()
            .remove(key)
            .ok_or_else(|| LindenError::not_found(format!("no generation '{name}'")))?;
        self.store
            .destroy(&core, &GenerationName::Multi(key.to_string()))
    }

    fn close(&self) -> Result<()> {
        let _guard = self.transitions.lock();
        for generation in self.generations() {
            generation.close()?;
        }
        Ok(())
    }
}
