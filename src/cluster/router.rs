//! Cluster-wide entry point.
//!
//! A search resolves its shard set, sends one request per shard to a
//! replica chosen by that shard's [`ShardChannel`], waits at most the
//! search budget and merges whatever arrived. Shards still outstanding at
//! the deadline are left out of the merge. Writes and administrative
//! commands go to every replica of the resolved shards and are reported as
//! one response.
//!
//! [`ShardChannel`]: crate::cluster::channel::ShardChannel

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::cluster::cache::{CacheStats, ResultCache};
use crate::cluster::endpoint::Endpoint;
use crate::cluster::membership::{
    ChangeKind, ChildEvent, Coordinator, ShardMembership, nodes_all_path, shard_path, shards_path,
};
use crate::cluster::pool::WorkerPool;
use crate::cluster::transport::ShardTransport;
use crate::command::Command;
use crate::config::LindenConfig;
use crate::error::Result;
use crate::merge::ResultMerger;
use crate::search::request::{DeleteRequest, IndexRequest, RouteParam, SearchRequest};
use crate::search::result::{MergedResult, Response, ShardResult, ShardSummary};
use crate::util::id::shard_for_id;

#[derive(Debug)]
pub struct ClusterRouter {
    config: LindenConfig,
    local: Endpoint,
    coordinator: Arc<dyn Coordinator>,
    transport: Arc<dyn ShardTransport>,
    membership: Arc<ShardMembership>,
    pool: WorkerPool,
    cache: Option<ResultCache>,
}

impl ClusterRouter {
    pub fn new(
        config: &LindenConfig,
        coordinator: Arc<dyn Coordinator>,
        transport: Arc<dyn ShardTransport>,
    ) -> Result<Self> {
        let local = Endpoint::parse(&config.endpoint)?;
        let membership = Arc::new(ShardMembership::new(
            Some(local.clone()),
            config.replica_selection,
        ));
        let pool = WorkerPool::new(
            "cluster",
            config.pool.cluster_workers,
            config.pool.max_queue_wait(),
        );
        let cache = config
            .cache
            .enabled
            .then(|| ResultCache::new(config.cache.capacity));
        Ok(Self {
            config: config.clone(),
            local,
            coordinator,
            transport,
            membership,
            pool,
            cache,
        })
    }

    /// Watch shard membership and load what is already registered.
    pub async fn start(&self) -> Result<()> {
        let shards_root = shards_path(&self.config.root_path);
        let membership = self.membership.clone();
        let watch_root = shards_root.clone();
        self.coordinator
            .watch(
                &shards_root,
                Arc::new(move |event: &ChildEvent| membership.apply(&watch_root, event)),
            )
            .await?;

        for shard in self.coordinator.children(&shards_root).await? {
            self.membership.apply(
                &shards_root,
                &ChildEvent {
                    parent: shards_root.clone(),
                    child: shard.clone(),
                    kind: ChangeKind::Added,
                },
            );
            let shard_dir = format!("{shards_root}/{shard}");
            for replica in self.coordinator.children(&shard_dir).await? {
                self.membership.apply(
                    &shards_root,
                    &ChildEvent {
                        parent: shard_dir.clone(),
                        child: replica,
                        kind: ChangeKind::Added,
                    },
                );
            }
        }
        info!(
            "router on {} sees shards {:?}",
            self.local,
            self.membership.shard_ids()
        );
        Ok(())
    }

    /// Announce this node as a replica of its configured shard.
    pub async fn register(&self) -> Result<()> {
        let root = &self.config.root_path;
        self.coordinator
            .register(&format!("{}/{}", nodes_all_path(root), self.local))
            .await?;
        self.coordinator
            .register(&format!(
                "{}/{}",
                shard_path(root, self.config.shard_id),
                self.local
            ))
            .await?;
        info!(
            "registered {} as a replica of shard {}",
            self.local, self.config.shard_id
        );
        Ok(())
    }

    /// Withdraw this node's registrations.
    pub async fn stop(&self) -> Result<()> {
        let root = &self.config.root_path;
        self.coordinator
            .unregister(&format!(
                "{}/{}",
                shard_path(root, self.config.shard_id),
                self.local
            ))
            .await?;
        self.coordinator
            .unregister(&format!("{}/{}", nodes_all_path(root), self.local))
            .await?;
        info!("unregistered {}", self.local);
        Ok(())
    }

    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    pub fn membership(&self) -> &Arc<ShardMembership> {
        &self.membership
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(ResultCache::stats)
    }

    pub async fn search(&self, request: SearchRequest) -> MergedResult {
        match &self.cache {
            Some(cache) => {
                cache
                    .get_or_execute(&request, || self.search_uncached(&request))
                    .await
            }
            None => self.search_uncached(&request).await,
        }
    }

    async fn search_uncached(&self, request: &SearchRequest) -> MergedResult {
        match self.pool.run(async { Ok(self.fan_out(request).await) }).await {
            Ok(result) => result,
            Err(e) => MergedResult::failed(e.to_string(), ShardSummary::default()),
        }
    }

    async fn fan_out(&self, request: &SearchRequest) -> MergedResult {
        let shard_ids = self.resolve_shards(request.route.as_ref());
        if shard_ids.is_empty() {
            return MergedResult::failed("no shards available", ShardSummary::default());
        }

        let collected: Arc<Mutex<Vec<ShardResult>>> =
            Arc::new(Mutex::new(Vec::with_capacity(shard_ids.len())));
        let replica_key = request.replica_key();
        let mut dispatched = Vec::with_capacity(shard_ids.len());
        let mut handles = Vec::with_capacity(shard_ids.len());

        for shard_id in shard_ids {
            let Some(endpoint) = self
                .membership
                .channel(shard_id)
                .and_then(|channel| channel.select(replica_key))
            else {
                warn!("shard {shard_id} has no available replica");
                collected.lock().push(ShardResult::failed(
                    shard_id,
                    format!("no replica available for shard {shard_id}"),
                ));
                continue;
            };

            let transport = self.transport.clone();
            let sink = collected.clone();
            let shard_request = request.for_shard(shard_id);
            dispatched.push(shard_id);
            handles.push(tokio::spawn(async move {
                let result = match transport.search(&endpoint, shard_request).await {
                    Ok(mut result) => {
                        result.shard_id = shard_id;
                        result
                    }
                    Err(e) => {
                        warn!("shard {shard_id} on {endpoint} failed: {e}");
                        ShardResult::failed(shard_id, e.to_string())
                    }
                };
                sink.lock().push(result);
            }));
        }

        let budget = self.config.timeouts.search();
        match tokio::time::timeout(budget, join_all(handles)).await {
            Ok(outcomes) => {
                for (shard_id, outcome) in dispatched.iter().zip(outcomes) {
                    if let Err(e) = outcome {
                        warn!("search task for shard {shard_id} died: {e}");
                        collected
                            .lock()
                            .push(ShardResult::failed(*shard_id, format!("shard task failed: {e}")));
                    }
                }
            }
            Err(_) => debug!("search budget of {budget:?} elapsed"),
        }

        // Late answers still land in `collected` and are dropped with it.
        let results = std::mem::take(&mut *collected.lock());
        let answered: BTreeSet<u32> = results.iter().map(|r| r.shard_id).collect();
        for shard_id in dispatched.iter().filter(|id| !answered.contains(id)) {
            warn!("shard {shard_id} did not answer within {budget:?}; left out of the merge");
        }
        if results.is_empty() {
            return MergedResult::failed(
                format!("no shard answered within {budget:?}"),
                ShardSummary::default(),
            );
        }
        ResultMerger::merge(request, results)
    }

    /// Delete matching documents on every replica of the routed shards.
    pub async fn delete(&self, request: DeleteRequest) -> Response {
        let shard_ids = self.resolve_shards(request.route.as_ref());
        let response = self
            .broadcast(
                &shard_ids,
                self.config.timeouts.write(),
                "delete",
                move |transport, endpoint| {
                    let request = request.clone();
                    async move { transport.delete(&endpoint, request).await }
                },
            )
            .await;
        self.invalidate_cache(&response);
        response
    }

    /// Write one document to every replica of the shard that owns it.
    pub async fn index(&self, payload: &str) -> Response {
        let request = match IndexRequest::parse(payload) {
            Ok(request) => request,
            Err(e) => return Response::error(e.to_string()),
        };
        let shard_ids = self.membership.shard_ids();
        let shard_id = match request.shard {
            Some(shard_id) => shard_id,
            None if shard_ids.is_empty() => {
                return Response::error(format!("no shards available to index {}", request.id));
            }
            None => {
                let slot = shard_for_id(&request.id, shard_ids.len() as u32) as usize;
                shard_ids[slot]
            }
        };
        debug!("routing document {} to shard {shard_id}", request.id);

        let payload = payload.to_string();
        let response = self
            .broadcast(
                &[shard_id],
                self.config.timeouts.write(),
                "index",
                move |transport, endpoint| {
                    let payload = payload.clone();
                    async move { transport.index(&endpoint, payload).await }
                },
            )
            .await;
        self.invalidate_cache(&response);
        response
    }

    /// Run an administrative command on every replica of every shard.
    pub async fn execute_command(&self, command: &str) -> Response {
        let parsed = match Command::parse(command) {
            Ok(parsed) => parsed,
            Err(e) => return Response::error(e.to_string()),
        };
        info!("broadcasting {parsed}");
        let shard_ids = self.membership.shard_ids();
        let command = command.to_string();
        let response = self
            .broadcast(
                &shard_ids,
                self.config.timeouts.command(),
                parsed.name(),
                move |transport, endpoint| {
                    let command = command.clone();
                    async move { transport.execute_command(&endpoint, command).await }
                },
            )
            .await;
        self.invalidate_cache(&response);
        response
    }

    fn resolve_shards(&self, route: Option<&RouteParam>) -> Vec<u32> {
        match route.filter(|r| !r.is_empty()) {
            Some(route) => {
                let mut seen = BTreeSet::new();
                route
                    .shards
                    .iter()
                    .map(|t| t.shard_id)
                    .filter(|id| seen.insert(*id))
                    .collect()
            }
            None => self.membership.shard_ids(),
        }
    }

    /// Call every replica of `shard_ids` concurrently, each bounded by
    /// `budget`. Succeeds only if every replica succeeded.
    async fn broadcast<F, Fut>(
        &self,
        shard_ids: &[u32],
        budget: Duration,
        operation: &str,
        call: F,
    ) -> Response
    where
        F: Fn(Arc<dyn ShardTransport>, Endpoint) -> Fut,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let admitted = self.pool.run(async {
            let mut errors = Vec::new();
            let mut targets = Vec::new();
            for shard_id in shard_ids {
                match self.membership.channel(*shard_id) {
                    Some(channel) if channel.is_available() => {
                        targets.extend(channel.endpoints().iter().cloned())
                    }
                    _ => errors.push(format!("shard {shard_id}: no replica available")),
                }
            }
            if targets.is_empty() && errors.is_empty() {
                errors.push("no shards available".to_string());
            }

            let handles: Vec<_> = targets
                .iter()
                .map(|endpoint| {
                    let call = call(self.transport.clone(), endpoint.clone());
                    tokio::spawn(tokio::time::timeout(budget, call))
                })
                .collect();
            for (endpoint, outcome) in targets.iter().zip(join_all(handles).await) {
                match outcome {
                    Ok(Ok(Ok(response))) if response.success => {}
                    Ok(Ok(Ok(response))) => errors.push(format!("{endpoint}: {}", response.message)),
                    Ok(Ok(Err(e))) => errors.push(format!("{endpoint}: {e}")),
                    Ok(Err(_)) => errors.push(format!("{endpoint}: timed out after {budget:?}")),
                    Err(e) => errors.push(format!("{endpoint}: {e}")),
                }
            }
            Ok((targets.len(), errors))
        });

        match admitted.await {
            Ok((replicas, errors)) if errors.is_empty() => {
                debug!("{operation} succeeded on {replicas} replicas");
                Response::ok(format!("{operation} succeeded on {replicas} replicas"))
            }
            Ok((_, errors)) => {
                let message = errors.join("; ");
                warn!("{operation} failed: {message}");
                Response::error(message)
            }
            Err(e) => Response::error(e.to_string()),
        }
    }

    fn invalidate_cache(&self, response: &Response) {
        if let Some(cache) = &self.cache {
            if response.success {
                cache.clear();
            }
        }
    }
}
