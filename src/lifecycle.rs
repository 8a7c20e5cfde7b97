//! Index generation lifecycles.
//!
//! A node serves one logical index made of one or more generations, each
//! an [`IndexCore`] in its own directory. The lifecycle decides which
//! generation reads and writes go to, when generations are created, and
//! when they are swapped out or evicted. Transitions are serialized by one
//! mutex per lifecycle; searches and writes on an open generation only clone
//! an `Arc` out of a read-locked map and never wait for a transition.

pub mod hot_swap;
pub mod multi;
pub mod naming;
pub mod simple;

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{LifecycleConfig, LindenConfig};
use crate::error::{LindenError, Result};
use crate::index::{BackendRegistry, GenerationState, IndexCore, IndexStats};
use crate::search::query::Query;
use crate::search::request::SearchRequest;
use crate::search::result::ShardResult;

pub use self::hot_swap::HotSwapLifecycle;
pub use self::multi::{Clock, MultiIndexLifecycle, SystemClock};
pub use self::naming::GenerationName;
pub use self::simple::SimpleLifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Simple,
    HotSwap,
    MultiIndex,
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleKind::Simple => "simple",
            LifecycleKind::HotSwap => "hot_swap",
            LifecycleKind::MultiIndex => "multi_index",
        })
    }
}

/// Strategy managing the generations of one logical index.
pub trait IndexLifecycle: Send + Sync + fmt::Debug {
    fn kind(&self) -> LifecycleKind;

    /// Search the generations that serve reads.
    fn search(&self, request: &SearchRequest) -> Result<ShardResult>;

    /// Generation a write with the given target selector goes to, created
    /// on first reference where the strategy allows it.
    fn writer_for(&self, target: Option<&str>) -> Result<Arc<IndexCore>>;

    /// Every open generation, serving or pending.
    fn generations(&self) -> Vec<Arc<IndexCore>>;

    /// Delete matching documents from every open generation.
    fn delete_by_query(&self, query: &Query) -> Result<u64> {
        let mut removed = 0;
        for generation in self.generations() {
            removed += generation.delete_by_query(query)?;
        }
        Ok(removed)
    }

    /// Promote a pending generation to current.
    fn swap(&self, target: &str) -> Result<()> {
        Err(LindenError::invalid_transition(format!(
            "{} lifecycle cannot swap to '{target}'",
            self.kind()
        )))
    }

    /// Remove a generation by name.
    fn delete_generation(&self, name: &str) -> Result<()> {
        Err(LindenError::invalid_transition(format!(
            "{} lifecycle cannot delete generation '{name}'",
            self.kind()
        )))
    }

    fn stats(&self) -> Vec<IndexStats> {
        self.generations().iter().map(|g| g.stats()).collect()
    }

    /// Close every generation. The lifecycle is unusable afterwards.
    fn close(&self) -> Result<()>;
}

/// Opens, renames and removes generation directories under the data dir.
#[derive(Debug, Clone)]
pub struct GenerationStore {
    root: PathBuf,
    backends: BackendRegistry,
    config: LindenConfig,
}

impl GenerationStore {
    pub fn new(config: &LindenConfig, backends: BackendRegistry) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            root: config.data_dir.clone(),
            backends,
            config: config.clone(),
        })
    }

    /// Directory of `name`. Names that would leave the data dir are refused.
    pub fn path(&self, name: &GenerationName) -> Result<PathBuf> {
        Ok(self.root.join(name.dir_name()?))
    }

    pub fn open(&self, name: &GenerationName) -> Result<Arc<IndexCore>> {
        let core = IndexCore::open(
            name.to_string(),
            self.path(name)?,
            &self.backends,
            &self.config,
        )?;
        Ok(Arc::new(core))
    }

    /// Generation directories currently on disk, sorted by name.
    pub fn scan(&self) -> Result<Vec<GenerationName>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.file_name().to_string_lossy().into_owned();
            match GenerationName::parse(&dir) {
                Some(name) => names.push(name),
                None => warn!("ignoring unknown directory {dir} in {}", self.root.display()),
            }
        }
        names.sort_by_key(|name| name.to_string());
        Ok(names)
    }

    pub fn rename(&self, from: &GenerationName, to: &GenerationName) -> Result<()> {
        let target = self.path(to)?;
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        fs::rename(self.path(from)?, target)?;
        Ok(())
    }

    /// Close `core` and move its directory aside as `expired_<name>`.
    pub fn archive(&self, core: &IndexCore, name: &GenerationName) -> Result<()> {
        core.set_state(GenerationState::Retiring);
        core.close()?;
        self.rename(name, &name.clone().expired())?;
        info!("archived generation {name}");
        Ok(())
    }

    /// Close `core` and delete its directory.
    pub fn destroy(&self, core: &IndexCore, name: &GenerationName) -> Result<()> {
        core.set_state(GenerationState::Retiring);
        core.close()?;
        self.remove(name)
    }

    /// Delete the directory of a generation that is not open.
    pub fn remove(&self, name: &GenerationName) -> Result<()> {
        let doomed = name.clone().deleted();
        self.rename(name, &doomed)?;
        fs::remove_dir_all(self.path(&doomed)?)?;
        info!("deleted generation {name}");
        Ok(())
    }

    /// Remove `delete_*` directories left behind by an interrupted removal.
    pub fn purge_deleted(&self) -> Result<()> {
        for name in self.scan()? {
            if matches!(name, GenerationName::Deleted(_)) {
                fs::remove_dir_all(self.path(&name)?)?;
                info!("purged leftover {name}");
            }
        }
        Ok(())
    }
}

/// Builds the lifecycle a node's configuration asks for.
pub struct LifecycleFactory;

impl LifecycleFactory {
    pub fn create(
        config: &LindenConfig,
        backends: BackendRegistry,
    ) -> Result<Arc<dyn IndexLifecycle>> {
        let store = GenerationStore::new(config, backends)?;
        let lifecycle: Arc<dyn IndexLifecycle> = match &config.lifecycle {
            LifecycleConfig::Simple => Arc::new(SimpleLifecycle::open(store)?),
            LifecycleConfig::HotSwap { max_next } => {
                Arc::new(HotSwapLifecycle::open(store, *max_next)?)
            }
            LifecycleConfig::MultiIndex { division, max_live } => Arc::new(
                MultiIndexLifecycle::open(
                    store,
                    division.clone(),
                    *max_live,
                    Arc::new(SystemClock),
                )?,
            ),
        };
        info!("started {} lifecycle", lifecycle.kind());
        Ok(lifecycle)
    }
}
