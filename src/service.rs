//! The upstream RPC surface of a Linden node.
//!
//! Every entry point answers with a result object. Errors become
//! `success = false` responses, and a panic below an entry point is caught
//! there and reported as an internal error instead of tearing down the
//! caller.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use log::{error, info};
use uuid::Uuid;

use crate::cluster::membership::Coordinator;
use crate::cluster::router::ClusterRouter;
use crate::cluster::transport::{LocalTransport, ShardTransport};
use crate::config::LindenConfig;
use crate::error::Result;
use crate::index::BackendRegistry;
use crate::node::NodeService;
use crate::search::request::{DeleteRequest, SearchRequest};
use crate::search::result::{MergedResult, Response, ServiceInfo, ShardSummary};

#[derive(Debug)]
pub struct LindenService {
    node_id: String,
    node: Arc<NodeService>,
    router: ClusterRouter,
}

impl LindenService {
    pub fn new(
        config: &LindenConfig,
        node: Arc<NodeService>,
        coordinator: Arc<dyn Coordinator>,
        transport: Arc<dyn ShardTransport>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            node_id: Uuid::new_v4().to_string(),
            node,
            router: ClusterRouter::new(config, coordinator, transport)?,
        })
    }

    /// Open a node, bind it on an in-process transport and join the cluster.
    pub async fn start_local(
        config: &LindenConfig,
        backends: BackendRegistry,
        coordinator: Arc<dyn Coordinator>,
        transport: Arc<LocalTransport>,
    ) -> Result<Self> {
        let node = Arc::new(NodeService::open(config, backends)?);
        transport.bind(node.endpoint().clone(), node.clone());
        let service = Self::new(config, node, coordinator, transport)?;
        service.start().await?;
        Ok(service)
    }

    /// Start watching membership, then announce this node.
    pub async fn start(&self) -> Result<()> {
        self.router.start().await?;
        self.router.register().await?;
        info!("node {} ({}) started", self.node_id, self.node.endpoint());
        Ok(())
    }

    /// Leave the cluster and close the local generations.
    pub async fn stop(&self) -> Result<()> {
        self.router.stop().await?;
        self.node.close()
    }

    pub fn node(&self) -> &Arc<NodeService> {
        &self.node
    }

    pub fn router(&self) -> &ClusterRouter {
        &self.router
    }

    pub async fn search(&self, request: SearchRequest) -> MergedResult {
        guarded("search", self.router.search(request), |message| {
            MergedResult::failed(message, ShardSummary::default())
        })
        .await
    }

    pub async fn delete(&self, request: DeleteRequest) -> Response {
        guarded("delete", self.router.delete(request), Response::error).await
    }

    pub async fn index(&self, payload: &str) -> Response {
        guarded("index", self.router.index(payload), Response::error).await
    }

    pub async fn execute_command(&self, command: &str) -> Response {
        guarded(
            "executeCommand",
            self.router.execute_command(command),
            Response::error,
        )
        .await
    }

    pub fn get_service_info(&self) -> ServiceInfo {
        let lifecycle = self.node.lifecycle();
        ServiceInfo {
            node_id: self.node_id.clone(),
            endpoint: self.node.endpoint().to_string(),
            version: crate::VERSION.to_string(),
            shard_id: self.node.shard_id(),
            lifecycle: lifecycle.kind().to_string(),
            indexing_paused: self.node.is_paused(),
            shards: self.router.membership().snapshot(),
            generations: lifecycle.stats(),
        }
    }
}

async fn guarded<T, Fut>(operation: &str, call: Fut, on_panic: impl FnOnce(String) -> T) -> T
where
    Fut: Future<Output = T>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(value) => value,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("{operation} panicked: {message}");
            on_panic(format!("internal error in {operation}: {message}"))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explode() -> Response {
        panic!("writer exploded")
    }

    #[tokio::test]
    async fn test_guarded_turns_panics_into_failures() {
        let response = guarded("index", async { explode() }, Response::error).await;
        assert!(!response.success);
        assert_eq!(response.message, "internal error in index: writer exploded");

        let ok = guarded("index", async { Response::ok("fine") }, Response::error).await;
        assert!(ok.success);
    }
}
