use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use linden::search::{Hit, ShardResult};
use linden::{
    ALL_SHARDS_FAILED, ClusterRouter, Coordinator, DeleteRequest, Endpoint, LindenConfig,
    LindenError, LocalTransport, MemoryCoordinator, Query, Response, Result, RouteParam,
    SearchRequest, SearchRequestBuilder, ShardHandler,
};

/// A replica that answers with a canned result after an optional delay.
#[derive(Debug)]
struct CannedShard {
    shard_id: u32,
    total_hits: u64,
    delay: Duration,
    search_error: Option<String>,
    write_error: Option<String>,
    searches: AtomicUsize,
    writes: Mutex<Vec<String>>,
}

impl CannedShard {
    fn new(shard_id: u32, total_hits: u64) -> Self {
        Self {
            shard_id,
            total_hits,
            delay: Duration::ZERO,
            search_error: None,
            write_error: None,
            searches: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self, error: &str) -> Self {
        self.search_error = Some(error.to_string());
        self
    }

    fn rejecting_writes(mut self, error: &str) -> Self {
        self.write_error = Some(error.to_string());
        self
    }

    fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    fn write_result(&self, what: String) -> Result<Response> {
        self.writes.lock().push(what);
        match &self.write_error {
            Some(error) => Err(LindenError::shard(error.clone())),
            None => Ok(Response::ok("ok")),
        }
    }
}

#[async_trait]
impl ShardHandler for CannedShard {
    async fn search(&self, request: SearchRequest) -> Result<ShardResult> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = &self.search_error {
            return Ok(ShardResult::failed(self.shard_id, error.clone()));
        }
        let mut result = ShardResult::empty(self.shard_id);
        result.total_hits = self.total_hits;
        result.hits = (0..request.length.min(self.total_hits as usize))
            .map(|n| {
                Hit::new(
                    format!("s{}-{n}", self.shard_id),
                    (self.total_hits as f32) - n as f32,
                    n as u64,
                )
            })
            .collect();
        Ok(result)
    }

    async fn delete(&self, request: DeleteRequest) -> Result<Response> {
        self.write_result(format!("delete {:?}", request.query))
    }

    async fn index(&self, payload: String) -> Result<Response> {
        self.write_result(payload)
    }

    async fn execute_command(&self, command: String) -> Result<Response> {
        self.write_result(command)
    }
}

struct Cluster {
    coordinator: Arc<MemoryCoordinator>,
    transport: Arc<LocalTransport>,
    router: Arc<ClusterRouter>,
}

impl Cluster {
    async fn start(config: LindenConfig, shards: Vec<Arc<CannedShard>>) -> Self {
        let coordinator = Arc::new(MemoryCoordinator::new());
        let transport = Arc::new(LocalTransport::new());
        for shard in shards {
            let endpoint = Endpoint::new(format!("shard{}", shard.shard_id), 7700);
            coordinator
                .register(&format!("/linden/nodes/shards/{}/{endpoint}", shard.shard_id))
                .await
                .unwrap();
            transport.bind(endpoint, shard);
        }
        let router = Arc::new(
            ClusterRouter::new(&config, coordinator.clone(), transport.clone()).unwrap(),
        );
        router.start().await.unwrap();
        Self {
            coordinator,
            transport,
            router,
        }
    }
}

fn config() -> LindenConfig {
    let mut config = LindenConfig::default();
    config.endpoint = "router:7700".to_string();
    config.timeouts.search_ms = 200;
    config.timeouts.write_ms = 200;
    config
}

fn three_shards() -> Vec<Arc<CannedShard>> {
    vec![
        Arc::new(CannedShard::new(0, 10)),
        Arc::new(CannedShard::new(1, 20)),
        Arc::new(CannedShard::new(2, 40)),
    ]
}

#[tokio::test]
async fn test_route_restricts_fan_out_to_named_shards() {
    let shards = three_shards();
    let cluster = Cluster::start(config(), shards.clone()).await;

    let request = SearchRequestBuilder::new()
        .route(RouteParam::shards(&[0, 2]))
        .length(5)
        .build();
    let result = cluster.router.search(request).await;

    assert!(result.success);
    assert_eq!(result.total_hits, 50);
    assert_eq!(result.shards.total, 2);
    assert_eq!(shards[0].searches(), 1);
    assert_eq!(shards[1].searches(), 0);
    assert_eq!(shards[2].searches(), 1);
    // Shard 2 scores 40, 39, ... so it owns the whole first page.
    assert!(result.hits.iter().all(|h| h.id.starts_with("s2-")));
    assert!(result.hits.iter().all(|h| h.shard == Some(2)));
}

#[tokio::test]
async fn test_all_shards_and_pagination() {
    let cluster = Cluster::start(config(), three_shards()).await;
    let result = cluster
        .router
        .search(SearchRequestBuilder::new().offset(30).length(5).build())
        .await;
    assert!(result.success);
    assert_eq!(result.total_hits, 70);
    assert_eq!(result.hits.len(), 5);
    assert_eq!(result.shards.successful, 3);
}

#[tokio::test]
async fn test_partial_failure_is_a_warning() {
    let shards = vec![
        Arc::new(CannedShard::new(0, 10)),
        Arc::new(CannedShard::new(1, 20).failing("disk gone")),
        Arc::new(CannedShard::new(2, 40)),
    ];
    let cluster = Cluster::start(config(), shards).await;
    let result = cluster.router.search(SearchRequest::default()).await;

    assert!(result.success);
    assert_eq!(result.total_hits, 50);
    assert!(result.warning.unwrap().contains("1 shards failed"));
    assert_eq!(result.shards.failed, 1);
}

#[tokio::test]
async fn test_total_failure_sentinel() {
    let shards = (0..3)
        .map(|id| Arc::new(CannedShard::new(id, 5).failing("disk gone")))
        .collect();
    let cluster = Cluster::start(config(), shards).await;
    let result = cluster.router.search(SearchRequest::default()).await;

    assert!(!result.success);
    assert!(result.error.unwrap().starts_with(ALL_SHARDS_FAILED));
}

#[tokio::test]
async fn test_single_failed_shard_keeps_its_error() {
    let shards = vec![
        Arc::new(CannedShard::new(0, 10)),
        Arc::new(CannedShard::new(1, 20).failing("segment checksum mismatch")),
    ];
    let cluster = Cluster::start(config(), shards).await;
    let request = SearchRequestBuilder::new()
        .route(RouteParam::shards(&[1]))
        .build();
    let result = cluster.router.search(request).await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("segment checksum mismatch"));
}

#[tokio::test]
async fn test_slow_shard_is_left_out_of_the_merge() {
    let shards = vec![
        Arc::new(CannedShard::new(0, 10)),
        Arc::new(CannedShard::new(1, 20)),
        Arc::new(CannedShard::new(2, 40).slow(Duration::from_secs(2))),
    ];
    let cluster = Cluster::start(config(), shards).await;
    let started = std::time::Instant::now();
    let result = cluster.router.search(SearchRequest::default()).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(result.success);
    assert!(result.warning.is_none());
    assert_eq!(result.total_hits, 30);
    assert_eq!(result.shards.total, 2);
}

#[tokio::test]
async fn test_nothing_answers_in_time() {
    let shards = vec![Arc::new(
        CannedShard::new(0, 10).slow(Duration::from_secs(2)),
    )];
    let cluster = Cluster::start(config(), shards).await;
    let result = cluster.router.search(SearchRequest::default()).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("no shard answered"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cache_runs_duplicate_searches_once() {
    let shards = vec![
        Arc::new(CannedShard::new(0, 10).slow(Duration::from_millis(50))),
        Arc::new(CannedShard::new(1, 20).slow(Duration::from_millis(50))),
    ];
    let mut config = config();
    config.cache.enabled = true;
    let cluster = Cluster::start(config, shards.clone()).await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let router = cluster.router.clone();
        handles.push(tokio::spawn(async move {
            router.search(SearchRequest::default()).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().total_hits, 30);
    }
    assert_eq!(shards[0].searches(), 1);
    assert_eq!(shards[1].searches(), 1);
    let stats = cluster.router.cache_stats().unwrap();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 5);

    // A successful write drops cached answers.
    assert!(cluster.router.index(r#"{"id": "x", "shard": 0}"#).await.success);
    cluster.router.search(SearchRequest::default()).await;
    assert_eq!(shards[0].searches(), 2);
}

#[tokio::test]
async fn test_writes_go_to_the_owning_shard() {
    let shards = three_shards();
    let cluster = Cluster::start(config(), shards.clone()).await;

    let response = cluster
        .router
        .index(r#"{"id": "doc-1", "fields": {"title": "x"}, "shard": 1}"#)
        .await;
    assert!(response.success, "{}", response.message);
    assert_eq!(shards[1].writes.lock().len(), 1);
    assert!(shards[0].writes.lock().is_empty());

    let owner = linden::shard_for_id("doc-2", 3) as usize;
    assert!(cluster.router.index(r#"{"id": "doc-2"}"#).await.success);
    assert_eq!(shards[owner].writes.lock().len(), 1 + usize::from(owner == 1));

    let bad = cluster.router.index("{ not json").await;
    assert!(!bad.success);
}

#[tokio::test]
async fn test_delete_and_commands_reach_every_replica() {
    let shards = vec![
        Arc::new(CannedShard::new(0, 1)),
        Arc::new(CannedShard::new(1, 1).rejecting_writes("read only")),
    ];
    let cluster = Cluster::start(config(), shards.clone()).await;

    let response = cluster
        .router
        .delete(DeleteRequest::new(Query::term("title", "x")))
        .await;
    assert!(!response.success);
    assert_eq!(response.message, "shard1:7700: Shard error: read only");
    assert_eq!(shards[0].writes.lock().len(), 1);

    let routed = cluster
        .router
        .delete(DeleteRequest::new(Query::match_all()).with_route(RouteParam::shards(&[0])))
        .await;
    assert!(routed.success);

    let command = cluster
        .router
        .execute_command(r#"{"type": "FLUSH_INDEX"}"#)
        .await;
    assert!(!command.success);
    assert_eq!(shards[0].writes.lock().len(), 3);

    let invalid = cluster.router.execute_command(r#"{"type": "EXPLODE"}"#).await;
    assert!(!invalid.success);
    assert!(invalid.message.contains("unknown command type"));
    assert_eq!(shards[0].writes.lock().len(), 3);
}

#[tokio::test]
async fn test_membership_churn_is_followed() {
    let shards = vec![Arc::new(CannedShard::new(0, 10))];
    let cluster = Cluster::start(config(), shards).await;

    let replica = Arc::new(CannedShard::new(0, 10));
    let endpoint = Endpoint::new("replica", 7701);
    cluster.transport.bind(endpoint.clone(), replica.clone());
    cluster
        .coordinator
        .register(&format!("/linden/nodes/shards/0/{endpoint}"))
        .await
        .unwrap();
    assert_eq!(cluster.router.membership().snapshot()[&0].len(), 2);

    cluster
        .coordinator
        .unregister("/linden/nodes/shards/0/shard0:7700")
        .await
        .unwrap();
    for _ in 0..3 {
        assert!(cluster.router.search(SearchRequest::default()).await.success);
    }
    assert_eq!(replica.searches(), 3);

    cluster
        .coordinator
        .unregister(&format!("/linden/nodes/shards/0/{endpoint}"))
        .await
        .unwrap();
    let result = cluster.router.search(SearchRequest::default()).await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("no replica available for shard 0")
    );
}

#[test]
fn test_router_rejects_bad_endpoint() {
    let mut config = config();
    config.endpoint = "no-port".to_string();
    let coordinator = Arc::new(MemoryCoordinator::new());
    let transport = Arc::new(LocalTransport::new());
    assert!(ClusterRouter::new(&config, coordinator, transport).is_err());
}

#[test]
fn test_register_and_stop_round_trip() {
    tokio_test::block_on(async {
        let coordinator = Arc::new(MemoryCoordinator::new());
        let router =
            ClusterRouter::new(&config(), coordinator.clone(), Arc::new(LocalTransport::new()))
                .unwrap();
        router.start().await.unwrap();
        router.register().await.unwrap();
        assert_eq!(
            coordinator.children("/linden/nodes/all").await.unwrap(),
            vec!["router:7700"]
        );
        assert_eq!(router.membership().shard_ids(), vec![0]);

        router.stop().await.unwrap();
        assert!(coordinator.children("/linden/nodes/all").await.unwrap().is_empty());
        assert!(!router.membership().channel(0).unwrap().is_available());
    });
}
