//! Replica selection for one shard.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cluster::endpoint::Endpoint;
use crate::util::id::slot_for_key;

/// How a channel picks a replica when the request carries no affinity key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaSelection {
    /// The co-located replica if there is one, else round-robin.
    #[default]
    PreferLocal,
    RoundRobin,
}

/// Replica endpoints of one shard.
///
/// The endpoint list is copy-on-write: membership deltas build a new list
/// and swap it in, while in-flight selections keep the list they read.
#[derive(Debug)]
pub struct ShardChannel {
    shard_id: u32,
    endpoints: RwLock<Arc<Vec<Endpoint>>>,
    local: Option<Endpoint>,
    selection: ReplicaSelection,
    next: AtomicUsize,
}

impl ShardChannel {
    pub fn new(shard_id: u32, local: Option<Endpoint>, selection: ReplicaSelection) -> Self {
        Self {
            shard_id,
            endpoints: RwLock::new(Arc::new(Vec::new())),
            local,
            selection,
            next: AtomicUsize::new(0),
        }
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn add(&self, endpoint: Endpoint) {
        let mut guard = self.endpoints.write();
        if guard.contains(&endpoint) {
            return;
        }
        let mut next = (**guard).clone();
        next.push(endpoint);
        // Sorted so that affinity slots agree across routers.
        next.sort();
        *guard = Arc::new(next);
        debug!("shard {} now has {} replicas", self.shard_id, guard.len());
    }

    pub fn remove(&self, endpoint: &Endpoint) {
        let mut guard = self.endpoints.write();
        if !guard.contains(endpoint) {
            return;
        }
        let next: Vec<Endpoint> = guard.iter().filter(|e| *e != endpoint).cloned().collect();
        *guard = Arc::new(next);
        debug!("shard {} now has {} replicas", self.shard_id, guard.len());
    }

    pub fn endpoints(&self) -> Arc<Vec<Endpoint>> {
        self.endpoints.read().clone()
    }

    pub fn is_available(&self) -> bool {
        !self.endpoints.read().is_empty()
    }

    /// Pick the replica for one call: the affinity slot when a key is given,
    /// then the local replica, then round-robin.
    pub fn select(&self, replica_key: Option<&str>) -> Option<Endpoint> {
        let endpoints = self.endpoints();
        if endpoints.is_empty() {
            return None;
        }
        if let Some(key) = replica_key {
            return endpoints.get(slot_for_key(key, endpoints.len())).cloned();
        }
        if self.selection == ReplicaSelection::PreferLocal {
            if let Some(local) = self.local.as_ref().filter(|l| endpoints.contains(l)) {
                return Some(local.clone());
            }
        }
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        endpoints.get(slot).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn make_channel(local: Option<&str>, selection: ReplicaSelection) -> ShardChannel {
        let channel = ShardChannel::new(0, local.map(|l| l.parse().unwrap()), selection);
        for host in ["a:1", "b:1", "c:1"] {
            channel.add(host.parse().unwrap());
        }
        channel
    }

    #[test]
    fn test_affinity_key_is_sticky() {
        let channel = make_channel(Some("b:1"), ReplicaSelection::PreferLocal);
        let first = channel.select(Some("session-42")).unwrap();
        for _ in 0..10 {
            assert_eq!(channel.select(Some("session-42")).unwrap(), first);
        }
    }

    #[test]
    fn test_prefers_local_then_round_robin() {
        let channel = make_channel(Some("b:1"), ReplicaSelection::PreferLocal);
        assert_eq!(channel.select(None).unwrap().to_string(), "b:1");

        channel.remove(&"b:1".parse().unwrap());
        let picked: BTreeSet<String> = (0..4)
            .map(|_| channel.select(None).unwrap().to_string())
            .collect();
        assert_eq!(picked.len(), 2);

        let channel = make_channel(Some("b:1"), ReplicaSelection::RoundRobin);
        let picked: BTreeSet<String> = (0..3)
            .map(|_| channel.select(None).unwrap().to_string())
            .collect();
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn test_churn_does_not_disturb_held_lists() {
        let channel = make_channel(None, ReplicaSelection::default());
        let held = channel.endpoints();
        channel.remove(&"a:1".parse().unwrap());
        channel.add("d:1".parse().unwrap());
        assert_eq!(held.len(), 3);
        assert_eq!(channel.endpoints().len(), 3);

        let empty = ShardChannel::new(1, None, ReplicaSelection::default());
        assert!(!empty.is_available());
        assert!(empty.select(Some("k")).is_none());
    }
}
