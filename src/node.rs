//! Node-local execution surface.
//!
//! A [`NodeService`] answers for one replica: it owns the node's lifecycle
//! manager and runs every request on the node worker pool, off the async
//! threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, info};

use crate::cluster::endpoint::Endpoint;
use crate::cluster::pool::WorkerPool;
use crate::cluster::transport::ShardHandler;
use crate::command::Command;
use crate::config::LindenConfig;
use crate::error::{LindenError, Result};
use crate::index::BackendRegistry;
use crate::lifecycle::{IndexLifecycle, LifecycleFactory};
use crate::search::request::{DeleteRequest, IndexRequest, SearchRequest};
use crate::search::result::{Response, ShardResult};

#[derive(Debug)]
pub struct NodeService {
    shard_id: u32,
    endpoint: Endpoint,
    lifecycle: Arc<dyn IndexLifecycle>,
    pool: WorkerPool,
    paused: Arc<AtomicBool>,
}

impl NodeService {
    /// Open the lifecycle the configuration names and serve it.
    pub fn open(config: &LindenConfig, backends: BackendRegistry) -> Result<Self> {
        let lifecycle = LifecycleFactory::create(config, backends)?;
        Self::new(config, lifecycle)
    }

    pub fn new(config: &LindenConfig, lifecycle: Arc<dyn IndexLifecycle>) -> Result<Self> {
        Ok(Self {
            shard_id: config.shard_id,
            endpoint: Endpoint::parse(&config.endpoint)?,
            lifecycle,
            pool: WorkerPool::new(
                "node",
                config.pool.node_workers,
                config.pool.max_queue_wait(),
            ),
            paused: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn lifecycle(&self) -> &Arc<dyn IndexLifecycle> {
        &self.lifecycle
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn close(&self) -> Result<()> {
        info!("closing node {}", self.endpoint);
        self.lifecycle.close()
    }

    fn write(lifecycle: &dyn IndexLifecycle, request: IndexRequest) -> Result<Response> {
        let generation = lifecycle.writer_for(request.target.as_deref())?;
        let document = request.document();
        if request.update {
            let mode = generation.update(&request.id, document)?;
            debug!(
                "updated {} in {} ({mode:?})",
                request.id,
                generation.name()
            );
            Ok(Response::ok(format!(
                "updated {} in {}",
                request.id,
                generation.name()
            )))
        } else {
            generation.index_doc(&request.id, document)?;
            debug!("indexed {} into {}", request.id, generation.name());
            Ok(Response::ok(format!(
                "indexed {} into {}",
                request.id,
                generation.name()
            )))
        }
    }

    fn run_command(
        lifecycle: &dyn IndexLifecycle,
        paused: &AtomicBool,
        command: Command,
    ) -> Result<Response> {
        match command {
            Command::SwapIndex { index } => {
                lifecycle.swap(&index)?;
                Ok(Response::ok(format!("swapped to {index}")))
            }
            Command::MergeIndex { count } => {
                let generations = lifecycle.generations();
                for generation in &generations {
                    generation.merge_segments(count)?;
                }
                Ok(Response::ok(format!(
                    "merged {} generations to {count} segments",
                    generations.len()
                )))
            }
            Command::FlushIndex => {
                let generations = lifecycle.generations();
                for generation in &generations {
                    generation.commit()?;
                    generation.refresh()?;
                }
                Ok(Response::ok(format!("flushed {} generations", generations.len())))
            }
            Command::PauseIndexing => {
                paused.store(true, Ordering::SeqCst);
                info!("indexing paused");
                Ok(Response::ok("indexing paused"))
            }
            Command::ResumeIndexing => {
                paused.store(false, Ordering::SeqCst);
                info!("indexing resumed");
                Ok(Response::ok("indexing resumed"))
            }
            Command::DeleteIndex { index } => {
                lifecycle.delete_generation(&index)?;
                Ok(Response::ok(format!("deleted {index}")))
            }
        }
    }
}

#[async_trait]
impl ShardHandler for NodeService {
    async fn search(&self, request: SearchRequest) -> Result<ShardResult> {
        let lifecycle = self.lifecycle.clone();
        let mut result = self
            .pool
            .run_blocking(move || lifecycle.search(&request))
            .await?;
        result.shard_id = self.shard_id;
        Ok(result)
    }

    async fn delete(&self, request: DeleteRequest) -> Result<Response> {
        let lifecycle = self.lifecycle.clone();
        let removed = self
            .pool
            .run_blocking(move || lifecycle.delete_by_query(&request.query))
            .await?;
        Ok(Response::ok(format!("deleted {removed} documents")))
    }

    async fn index(&self, payload: String) -> Result<Response> {
        if self.is_paused() {
            return Err(LindenError::closed("indexing is paused"));
        }
        let request = IndexRequest::parse(&payload)?;
        let lifecycle = self.lifecycle.clone();
        self.pool
            .run_blocking(move || Self::write(lifecycle.as_ref(), request))
            .await
    }

    async fn execute_command(&self, command: String) -> Result<Response> {
        let command = Command::parse(&command)?;
        info!("node {} executing {command}", self.endpoint);
        let lifecycle = self.lifecycle.clone();
        let paused = self.paused.clone();
        self.pool
            .run_blocking(move || Self::run_command(lifecycle.as_ref(), &paused, command))
            .await
    }
}
