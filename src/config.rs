//! Configuration for a Linden node.
//!
//! Every section has defaults, so an empty JSON object is a valid
//! configuration. Durations are stored as integer milliseconds or seconds
//! and exposed through `Duration` accessors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::channel::ReplicaSelection;
use crate::error::{LindenError, Result};
use crate::index::schema::Schema;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LindenConfig {
    /// Root of this cluster's paths in the coordination service.
    pub root_path: String,

    /// `host:port` other nodes reach this node on.
    pub endpoint: String,

    /// Shard this node serves a replica of.
    pub shard_id: u32,

    /// Directory holding this node's index generations.
    pub data_dir: PathBuf,

    /// Name of the backend in the [`BackendRegistry`](crate::index::registry::BackendRegistry).
    pub backend: String,

    pub schema: Schema,
    pub pool: PoolConfig,
    pub timeouts: TimeoutConfig,
    pub cache: CacheConfig,
    pub commit: CommitPolicy,
    pub nrt: NrtConfig,
    pub lifecycle: LifecycleConfig,
    pub replica_selection: ReplicaSelection,
}

impl Default for LindenConfig {
    fn default() -> Self {
        LindenConfig {
            root_path: "/linden".to_string(),
            endpoint: "127.0.0.1:7700".to_string(),
            shard_id: 0,
            data_dir: PathBuf::from("data"),
            backend: "memory".to_string(),
            schema: Schema::default(),
            pool: PoolConfig::default(),
            timeouts: TimeoutConfig::default(),
            cache: CacheConfig::default(),
            commit: CommitPolicy::default(),
            nrt: NrtConfig::default(),
            lifecycle: LifecycleConfig::default(),
            replica_selection: ReplicaSelection::default(),
        }
    }
}

impl LindenConfig {
    /// Parse a configuration from JSON text and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LindenConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(LindenError::invalid_config("endpoint must not be empty"));
        }
        if !self.root_path.starts_with('/') {
            return Err(LindenError::invalid_config(format!(
                "root_path '{}' must be absolute",
                self.root_path
            )));
        }
        if self.pool.cluster_workers == 0 || self.pool.node_workers == 0 {
            return Err(LindenError::invalid_config(
                "worker pools need at least one worker",
            ));
        }
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(LindenError::invalid_config(
                "cache capacity must be positive when the cache is enabled",
            ));
        }
        if self.nrt.min_refresh_ms > self.nrt.max_refresh_ms {
            return Err(LindenError::invalid_config(
                "nrt.min_refresh_ms must not exceed nrt.max_refresh_ms",
            ));
        }
        match &self.lifecycle {
            LifecycleConfig::HotSwap { max_next } if *max_next == 0 => Err(
                LindenError::invalid_config("hot swap needs room for at least one next index"),
            ),
            LifecycleConfig::MultiIndex { max_live, .. } if *max_live == 0 => Err(
                LindenError::invalid_config("multi index needs at least one live index"),
            ),
            LifecycleConfig::MultiIndex {
                division: Division::DocCount { max_docs },
                ..
            } if *max_docs == 0 => Err(LindenError::invalid_config(
                "doc count division needs a positive max_docs",
            )),
            _ => Ok(()),
        }
    }
}

/// Worker pools: one for cluster-wide fan-out, one for node-local work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub cluster_workers: usize,
    pub node_workers: usize,

    /// How long a request may wait for a worker before failing fast.
    pub max_queue_wait_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        PoolConfig {
            cluster_workers: cpus * 2,
            node_workers: cpus * 2,
            max_queue_wait_ms: 1_000,
        }
    }
}

impl PoolConfig {
    pub fn max_queue_wait(&self) -> Duration {
        Duration::from_millis(self.max_queue_wait_ms)
    }
}

/// Await budgets for fan-out operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub search_ms: u64,
    pub write_ms: u64,
    /// Administrative commands such as forced merges may run long.
    pub command_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            search_ms: 5_000,
            write_ms: 10_000,
            command_ms: 600_000,
        }
    }
}

impl TimeoutConfig {
    pub fn search(&self) -> Duration {
        Duration::from_millis(self.search_ms)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }

    pub fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }
}

/// Single-flight search result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: false,
            capacity: 1_024,
        }
    }
}

/// When the commit loop persists writer state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitPolicy {
    /// Commit once this many documents were written since the last commit.
    pub max_pending_docs: u64,

    /// Commit once this much time passed since the last commit.
    pub max_interval_secs: u64,

    /// How often the loop checks both thresholds.
    pub poll_interval_ms: u64,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        CommitPolicy {
            max_pending_docs: 10_000,
            max_interval_secs: 60,
            poll_interval_ms: 1_000,
        }
    }
}

impl CommitPolicy {
    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Reopen cadence of the near-real-time reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NrtConfig {
    /// Reopen interval when nobody waits for a fresh snapshot.
    pub max_refresh_ms: u64,

    /// Reopen interval while a caller waits for a just-written document.
    pub min_refresh_ms: u64,

    /// Upper bound on how long `refresh()` waits for visibility.
    pub refresh_wait_ms: u64,
}

impl Default for NrtConfig {
    fn default() -> Self {
        NrtConfig {
            max_refresh_ms: 1_000,
            min_refresh_ms: 25,
            refresh_wait_ms: 5_000,
        }
    }
}

impl NrtConfig {
    pub fn max_refresh(&self) -> Duration {
        Duration::from_millis(self.max_refresh_ms)
    }

    pub fn min_refresh(&self) -> Duration {
        Duration::from_millis(self.min_refresh_ms)
    }

    pub fn refresh_wait(&self) -> Duration {
        Duration::from_millis(self.refresh_wait_ms)
    }
}

/// Granularity of time-bucketed multi-index generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Hour,
    Day,
    Month,
    Year,
}

/// How a multi-index splits one logical index into generations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Division {
    /// One generation per time bucket containing "now".
    Time { unit: TimeUnit },
    /// Start a new generation once the newest one holds `max_docs` documents.
    DocCount { max_docs: u64 },
    /// Writers name the generation explicitly.
    Named,
}

/// Which lifecycle strategy manages this node's generations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LifecycleConfig {
    Simple,
    HotSwap {
        #[serde(default = "default_max_next")]
        max_next: usize,
    },
    MultiIndex {
        division: Division,
        max_live: usize,
    },
}

fn default_max_next() -> usize {
    3
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig::Simple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = LindenConfig::from_json_str("{}").unwrap();
        assert_eq!(config.backend, "memory");
        assert_eq!(config.lifecycle, LifecycleConfig::Simple);
        assert!(config.timeouts.command() > config.timeouts.search());
    }

    #[test]
    fn test_lifecycle_sections() {
        let config = LindenConfig::from_json_str(
            r#"{"lifecycle": {"strategy": "hot_swap"}, "cache": {"enabled": true}}"#,
        )
        .unwrap();
        assert_eq!(config.lifecycle, LifecycleConfig::HotSwap { max_next: 3 });
        assert!(config.cache.enabled);

        let config = LindenConfig::from_json_str(
            r#"{"lifecycle": {"strategy": "multi_index",
                "division": {"kind": "time", "unit": "day"}, "max_live": 7}}"#,
        )
        .unwrap();
        assert_eq!(
            config.lifecycle,
            LifecycleConfig::MultiIndex {
                division: Division::Time {
                    unit: TimeUnit::Day
                },
                max_live: 7
            }
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(LindenConfig::from_json_str(r#"{"root_path": "linden"}"#).is_err());
        assert!(
            LindenConfig::from_json_str(r#"{"lifecycle": {"strategy": "hot_swap", "max_next": 0}}"#)
                .is_err()
        );
        assert!(
            LindenConfig::from_json_str(r#"{"nrt": {"min_refresh_ms": 5000, "max_refresh_ms": 10}}"#)
                .is_err()
        );
    }
}
