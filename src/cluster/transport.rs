//! How a router reaches the node serving a replica.
//!
//! Wire framing is left to the embedding application; [`LocalTransport`]
//! dispatches in-process to registered [`ShardHandler`]s.

use std::fmt::Debug;
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::cluster::endpoint::Endpoint;
use crate::error::{LindenError, Result};
use crate::search::request::{DeleteRequest, SearchRequest};
use crate::search::result::{Response, ShardResult};

/// Node-local operations a replica answers.
#[async_trait]
pub trait ShardHandler: Send + Sync + Debug {
    async fn search(&self, request: SearchRequest) -> Result<ShardResult>;
    async fn delete(&self, request: DeleteRequest) -> Result<Response>;
    async fn index(&self, payload: String) -> Result<Response>;
    async fn execute_command(&self, command: String) -> Result<Response>;
}

/// Sends node-local operations to the replica at an endpoint.
#[async_trait]
pub trait ShardTransport: Send + Sync + Debug {
    async fn search(&self, endpoint: &Endpoint, request: SearchRequest) -> Result<ShardResult>;
    async fn delete(&self, endpoint: &Endpoint, request: DeleteRequest) -> Result<Response>;
    async fn index(&self, endpoint: &Endpoint, payload: String) -> Result<Response>;
    async fn execute_command(&self, endpoint: &Endpoint, command: String) -> Result<Response>;
}

/// In-process transport: endpoints map straight to handlers.
#[derive(Debug, Default)]
pub struct LocalTransport {
    handlers: RwLock<AHashMap<Endpoint, Arc<dyn ShardHandler>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, endpoint: Endpoint, handler: Arc<dyn ShardHandler>) {
        self.handlers.write().insert(endpoint, handler);
    }

    pub fn unbind(&self, endpoint: &Endpoint) {
        self.handlers.write().remove(endpoint);
    }

    fn handler(&self, endpoint: &Endpoint) -> Result<Arc<dyn ShardHandler>> {
        self.handlers
            .read()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| LindenError::shard(format!("no node listening on {endpoint}")))
    }
}

#[async_trait]
impl ShardTransport for LocalTransport {
    async fn search(&self, endpoint: &Endpoint, request: SearchRequest) -> Result<ShardResult> {
        self.handler(endpoint)?.search(request).await
    }

    async fn delete(&self, endpoint: &Endpoint, request: DeleteRequest) -> Result<Response> {
        self.handler(endpoint)?.delete(request).await
    }

    async fn index(&self, endpoint: &Endpoint, payload: String) -> Result<Response> {
        self.handler(endpoint)?.index(payload).await
    }

    async fn execute_command(&self, endpoint: &Endpoint, command: String) -> Result<Response> {
        self.handler(endpoint)?.execute_command(command).await
    }
}
