//! Cluster membership: the coordination-service seam and the shard table
//! built from its change notifications.
//!
//! Nodes register ephemeral paths:
//!
//! ```text
//! <root>/nodes/all/<endpoint>
//! <root>/nodes/shards/<shard_id>/<endpoint>
//! ```
//!
//! Routers watch `<root>/nodes/shards` and apply Added/Removed deltas to a
//! copy-on-write table of [`ShardChannel`]s.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::cluster::channel::{ReplicaSelection, ShardChannel};
use crate::cluster::endpoint::Endpoint;
use crate::error::{LindenError, Result};

pub fn nodes_all_path(root: &str) -> String {
    format!("{}/nodes/all", root.trim_end_matches('/'))
}

pub fn shards_path(root: &str) -> String {
    format!("{}/nodes/shards", root.trim_end_matches('/'))
}

pub fn shard_path(root: &str, shard_id: u32) -> String {
    format!("{}/{shard_id}", shards_path(root))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
}

/// A child appeared under or disappeared from `parent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEvent {
    pub parent: String,
    pub child: String,
    pub kind: ChangeKind,
}

pub type Watcher = Arc<dyn Fn(&ChildEvent) + Send + Sync>;

/// The subset of a coordination service Linden needs.
#[async_trait]
pub trait Coordinator: Send + Sync + Debug {
    /// Create `path` and any missing ancestors; the leaf is tied to this
    /// node's session.
    async fn register(&self, path: &str) -> Result<()>;

    async fn unregister(&self, path: &str) -> Result<()>;

    /// Direct children of `path`, sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Deliver every child change at or below `prefix` to `watcher`.
    async fn watch(&self, prefix: &str, watcher: Watcher) -> Result<()>;
}

/// In-process coordinator. Watchers run synchronously on the registering
/// task, after the tree lock is released.
#[derive(Default)]
pub struct MemoryCoordinator {
    tree: RwLock<BTreeMap<String, BTreeSet<String>>>,
    watchers: Mutex<Vec<(String, Watcher)>>,
}

impl Debug for MemoryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCoordinator")
            .field("paths", &self.tree.read().len())
            .field("watchers", &self.watchers.lock().len())
            .finish()
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn split(path: &str) -> Result<Vec<(String, String)>> {
        if !path.starts_with('/') || path.len() < 2 {
            return Err(LindenError::invalid_argument(format!(
                "coordination path '{path}' must be absolute"
            )));
        }
        let mut pairs = Vec::new();
        let mut parent = String::new();
        for part in path.trim_end_matches('/').split('/').skip(1) {
            if part.is_empty() {
                return Err(LindenError::invalid_argument(format!(
                    "coordination path '{path}' has an empty component"
                )));
            }
            let key = if parent.is_empty() { "/".to_string() } else { parent.clone() };
            pairs.push((key, part.to_string()));
            parent = format!("{parent}/{part}");
        }
        Ok(pairs)
    }

    fn notify(&self, events: Vec<ChildEvent>) {
        let watchers: Vec<(String, Watcher)> = self.watchers.lock().clone();
        for event in &events {
            for (prefix, watcher) in &watchers {
                if event.parent.starts_with(prefix.as_str()) {
                    watcher(event);
                }
            }
        }
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn register(&self, path: &str) -> Result<()> {
        let pairs = Self::split(path)?;
        let mut events = Vec::new();
        {
            let mut tree = self.tree.write();
            for (parent, child) in pairs {
                if tree.entry(parent.clone()).or_default().insert(child.clone()) {
                    events.push(ChildEvent {
                        parent,
                        child,
                        kind: ChangeKind::Added,
                    });
                }
            }
        }
        debug!("registered {path}");
        self.notify(events);
        Ok(())
    }

    async fn unregister(&self, path: &str) -> Result<()> {
        let Some((parent, child)) = Self::split(path)?.pop() else {
            return Ok(());
        };
        let removed = {
            let mut tree = self.tree.write();
            tree.remove(path.trim_end_matches('/'));
            tree.get_mut(&parent).is_some_and(|c| c.remove(&child))
        };
        if removed {
            debug!("unregistered {path}");
            self.notify(vec![ChildEvent {
                parent,
                child,
                kind: ChangeKind::Removed,
            }]);
        }
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .tree
            .read()
            .get(path.trim_end_matches('/'))
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn watch(&self, prefix: &str, watcher: Watcher) -> Result<()> {
        self.watchers.lock().push((prefix.to_string(), watcher));
        Ok(())
    }
}

/// Shard id to replica channel, replaced wholesale on every shard-level
/// change so readers never see a half-applied update.
#[derive(Debug)]
pub struct ShardMembership {
    shards: RwLock<Arc<BTreeMap<u32, Arc<ShardChannel>>>>,
    local: Option<Endpoint>,
    selection: ReplicaSelection,
}

impl ShardMembership {
    pub fn new(local: Option<Endpoint>, selection: ReplicaSelection) -> Self {
        Self {
            shards: RwLock::new(Arc::new(BTreeMap::new())),
            local,
            selection,
        }
    }

    pub fn channel(&self, shard_id: u32) -> Option<Arc<ShardChannel>> {
        self.shards.read().get(&shard_id).cloned()
    }

    /// Known shard ids, ascending.
    pub fn shard_ids(&self) -> Vec<u32> {
        self.shards.read().keys().copied().collect()
    }

    pub fn add_shard(&self, shard_id: u32) -> Arc<ShardChannel> {
        let mut guard = self.shards.write();
        if let Some(channel) = guard.get(&shard_id) {
            return channel.clone();
        }
        let channel = Arc::new(ShardChannel::new(
            shard_id,
            self.local.clone(),
            self.selection,
        ));
        let mut next = (**guard).clone();
        next.insert(shard_id, channel.clone());
        *guard = Arc::new(next);
        info!("shard {shard_id} joined");
        channel
    }

    pub fn remove_shard(&self, shard_id: u32) {
        let mut guard = self.shards.write();
        if guard.contains_key(&shard_id) {
            let mut next = (**guard).clone();
            next.remove(&shard_id);
            *guard = Arc::new(next);
            info!("shard {shard_id} left");
        }
    }

    /// Apply one coordination event seen under `shards_root`.
    pub fn apply(&self, shards_root: &str, event: &ChildEvent) {
        if event.parent == shards_root {
            let Ok(shard_id) = event.child.parse::<u32>() else {
                warn!("ignoring non-numeric shard '{}'", event.child);
                return;
            };
            match event.kind {
                ChangeKind::Added => {
                    self.add_shard(shard_id);
                }
                ChangeKind::Removed => self.remove_shard(shard_id),
            }
            return;
        }

        let Some(shard) = event
            .parent
            .strip_prefix(shards_root)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.parse::<u32>().ok())
        else {
            return;
        };
        let endpoint = match Endpoint::parse(&event.child) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("ignoring replica of shard {shard}: {e}");
                return;
            }
        };
        match event.kind {
            ChangeKind::Added => self.add_shard(shard).add(endpoint),
            ChangeKind::Removed => {
                if let Some(channel) = self.channel(shard) {
                    channel.remove(&endpoint);
                }
            }
        }
    }

    /// Replica endpoints per shard.
    pub fn snapshot(&self) -> BTreeMap<u32, Vec<String>> {
        self.shards
            .read()
            .iter()
            .map(|(id, channel)| {
                (
                    *id,
                    channel.endpoints().iter().map(|e| e.to_string()).collect(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_coordinator_tree_and_watch() {
        let coordinator = MemoryCoordinator::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        coordinator
            .watch(
                "/linden/nodes/shards",
                Arc::new(move |event: &ChildEvent| sink.lock().push(event.clone())),
            )
            .await
            .unwrap();

        coordinator
            .register("/linden/nodes/shards/0/a:1")
            .await
            .unwrap();
        coordinator
            .register("/linden/nodes/shards/0/b:1")
            .await
            .unwrap();
        assert_eq!(
            coordinator.children("/linden/nodes/shards/0").await.unwrap(),
            vec!["a:1", "b:1"]
        );

        coordinator
            .unregister("/linden/nodes/shards/0/a:1")
            .await
            .unwrap();
        let events = seen.lock().clone();
        let kinds: Vec<(String, ChangeKind)> = events
            .iter()
            .map(|e| (e.child.clone(), e.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("0".to_string(), ChangeKind::Added),
                ("a:1".to_string(), ChangeKind::Added),
                ("b:1".to_string(), ChangeKind::Added),
                ("a:1".to_string(), ChangeKind::Removed),
            ]
        );
        assert!(coordinator.register("relative/path").await.is_err());
    }

    #[test]
    fn test_membership_applies_deltas() {
        let membership = ShardMembership::new(None, ReplicaSelection::default());
        let root = shards_path("/linden");
        let event = |parent: String, child: &str, kind| ChildEvent {
            parent,
            child: child.to_string(),
            kind,
        };

        membership.apply(&root, &event(root.clone(), "1", ChangeKind::Added));
        membership.apply(
            &root,
            &event(shard_path("/linden", 1), "h:1", ChangeKind::Added),
        );
        membership.apply(
            &root,
            &event(shard_path("/linden", 2), "h:2", ChangeKind::Added),
        );
        assert_eq!(membership.shard_ids(), vec![1, 2]);

        let before = membership.snapshot();
        membership.apply(
            &root,
            &event(shard_path("/linden", 1), "h:1", ChangeKind::Removed),
        );
        assert_eq!(before[&1], vec!["h:1"]);
        assert!(!membership.channel(1).unwrap().is_available());

        membership.apply(&root, &event(root.clone(), "2", ChangeKind::Removed));
        assert_eq!(membership.shard_ids(), vec![1]);
    }
}
