//! Federation integration tests
//!
//! Peers are axum servers on ephemeral loopback ports that record every
//! request they receive.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Form, Query, State},
    http::{HeaderMap as AxumHeaders, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use kuba_finder::{
    cache::LocalFindCache,
    config::FederationConfig,
    node::{Node, RemoteBulkNode},
    remote::{extract_forward_headers, PeerSettings, RemoteStore},
    storage::Backends,
    store::Store,
    types::FetchResult,
    Error,
};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Mock peer
// =============================================================================

#[derive(Debug, Clone)]
struct SeenRequest {
    method: &'static str,
    path: &'static str,
    params: Vec<(String, String)>,
    headers: AxumHeaders,
}

impl SeenRequest {
    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn all(&self, name: &str) -> Vec<&str> {
        self.params
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

#[derive(Clone)]
struct MockPeer {
    records: Arc<Value>,
    delay: Duration,
    find_status: StatusCode,
    render_status: StatusCode,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl MockPeer {
    fn answering(records: Value) -> Self {
        Self {
            records: Arc::new(records),
            delay: Duration::ZERO,
            find_status: StatusCode::OK,
            render_status: StatusCode::OK,
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last(&self) -> SeenRequest {
        self.seen.lock().last().cloned().expect("peer saw no request")
    }

    fn record(
        &self,
        method: &'static str,
        path: &'static str,
        params: Vec<(String, String)>,
        headers: AxumHeaders,
    ) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(SeenRequest {
            method,
            path,
            params,
            headers,
        });
    }

    async fn find(&self, method: &'static str, params: Vec<(String, String)>, headers: AxumHeaders) -> Response {
        self.record(method, "find", params, headers);
        tokio::time::sleep(self.delay).await;
        if self.find_status != StatusCode::OK {
            return (self.find_status, "find failed").into_response();
        }
        Json(self.records.as_ref().clone()).into_response()
    }

    async fn render(&self, method: &'static str, params: Vec<(String, String)>, headers: AxumHeaders) -> Response {
        self.record(method, "render", params.clone(), headers);
        tokio::time::sleep(self.delay).await;
        if self.render_status != StatusCode::OK {
            return (self.render_status, "render failed").into_response();
        }

        let seen = SeenRequest {
            method,
            path: "render",
            params,
            headers: AxumHeaders::new(),
        };
        let from: i64 = seen.param("from").and_then(|v| v.parse().ok()).unwrap_or(0);
        let until: i64 = seen.param("until").and_then(|v| v.parse().ok()).unwrap_or(0);
        let series: Vec<Value> = seen
            .all("target")
            .into_iter()
            .map(|target| {
                json!({
                    "name": target,
                    "pathExpression": target,
                    "start": from,
                    "end": until,
                    "step": 60,
                    "values": [1.0, null],
                })
            })
            .collect();
        Json(Value::Array(series)).into_response()
    }
}

async fn find_get(
    State(peer): State<MockPeer>,
    headers: AxumHeaders,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    peer.find("GET", params, headers).await
}

async fn find_post(
    State(peer): State<MockPeer>,
    headers: AxumHeaders,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    peer.find("POST", params, headers).await
}

async fn render_get(
    State(peer): State<MockPeer>,
    headers: AxumHeaders,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    peer.render("GET", params, headers).await
}

async fn render_post(
    State(peer): State<MockPeer>,
    headers: AxumHeaders,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    peer.render("POST", params, headers).await
}

/// Serve `peer` on an ephemeral port and return its `host:port`
async fn spawn_peer(peer: MockPeer) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/metrics/find/", get(find_get).post(find_post))
        .route("/render/", get(render_get).post(render_post))
        .with_state(peer);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

// =============================================================================
// Helpers
// =============================================================================

fn touch(root: &Path, relative: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"").unwrap();
}

fn peers(config: &FederationConfig, hosts: &[&str]) -> Vec<Arc<RemoteStore>> {
    let settings = Arc::new(PeerSettings::from_config(config).unwrap());
    let cache = Arc::new(LocalFindCache::default());
    hosts
        .iter()
        .map(|host| Arc::new(RemoteStore::new(*host, Arc::clone(&settings), cache.clone())))
        .collect()
}

fn store(config: &FederationConfig, hosts: &[&str]) -> Store {
    Store::with_remote_stores(config, Backends::default(), peers(config, hosts)).unwrap()
}

fn paths(nodes: &[Node]) -> Vec<&str> {
    nodes.iter().map(|n| n.metric_path()).collect()
}

// =============================================================================
// Find
// =============================================================================

#[tokio::test]
async fn test_find_all_merges_local_first_and_dedups() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "servers/web01/cpu.wsp");

    let peer = MockPeer::answering(json!([
        {"metric_path": "servers.web01.cpu", "isLeaf": true},
        {"metric_path": "servers.db01.cpu", "isLeaf": true},
    ]));
    let host = spawn_peer(peer.clone()).await;

    let config = FederationConfig {
        data_dirs: vec![dir.path().to_path_buf()],
        ..FederationConfig::default()
    };
    let store = store(&config, &[host.as_str()]);

    let nodes = store.find("servers.*.cpu", &HeaderMap::new()).await.unwrap();
    assert_eq!(paths(&nodes), vec!["servers.web01.cpu", "servers.db01.cpu"]);
    assert!(nodes[0].is_local());
    assert!(!nodes[1].is_local());
    assert!(nodes[1].is_leaf());
    assert_eq!(peer.calls(), 1);
}

#[tokio::test]
async fn test_brace_query_over_local_roots() {
    let dir = TempDir::new().unwrap();
    for host in ["web01", "db01", "app01"] {
        touch(dir.path(), &format!("servers/{}/cpu.wsp", host));
    }

    let config = FederationConfig {
        data_dirs: vec![dir.path().to_path_buf()],
        ..FederationConfig::default()
    };
    let store = store(&config, &[]);

    let mut found: Vec<String> = store
        .find("servers.{web,db}01.cpu", &HeaderMap::new())
        .await
        .unwrap()
        .iter()
        .map(|n| n.metric_path().to_string())
        .collect();
    found.sort();
    assert_eq!(found, vec!["servers.db01.cpu", "servers.web01.cpu"]);
}

#[tokio::test]
async fn test_exact_local_hit_skips_peers() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "app/cpu.wsp");

    let peer = MockPeer::answering(json!([{"metric_path": "app.cpu", "isLeaf": true}]));
    let host = spawn_peer(peer.clone()).await;

    let config = FederationConfig {
        data_dirs: vec![dir.path().to_path_buf()],
        ..FederationConfig::default()
    };
    let store = store(&config, &[host.as_str()]);

    let nodes = store.find("app.cpu", &HeaderMap::new()).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert!(nodes[0].is_local());
    assert_eq!(peer.calls(), 0);
}

#[tokio::test]
async fn test_exact_local_miss_asks_peers() {
    let dir = TempDir::new().unwrap();
    let peer = MockPeer::answering(json!([{"metric_path": "app.mem", "isLeaf": true}]));
    let host = spawn_peer(peer.clone()).await;

    let config = FederationConfig {
        data_dirs: vec![dir.path().to_path_buf()],
        ..FederationConfig::default()
    };
    let store = store(&config, &[host.as_str()]);

    let node = store.find_first("app.mem", &HeaderMap::new()).await.unwrap().unwrap();
    assert_eq!(node.metric_path(), "app.mem");
    assert!(!node.is_local());

    let seen = peer.last();
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.param("local"), Some("1"));
    assert_eq!(seen.param("format"), Some("json"));
    assert_eq!(seen.param("query"), Some("app.mem"));
}

#[tokio::test]
async fn test_slow_peer_is_abandoned_within_budget() {
    let fast = MockPeer::answering(json!([{"metric_path": "a.fast", "isLeaf": true}]));
    let other = MockPeer::answering(json!([{"metric_path": "a.other", "isLeaf": true}]));
    let mut slow = MockPeer::answering(json!([{"metric_path": "a.slow", "isLeaf": true}]));
    slow.delay = Duration::from_millis(800);

    let fast_host = spawn_peer(fast).await;
    let other_host = spawn_peer(other).await;
    let slow_host = spawn_peer(slow.clone()).await;

    let config = FederationConfig {
        find_timeout_ms: 300,
        ..FederationConfig::default()
    };
    let store = store(
        &config,
        &[slow_host.as_str(), fast_host.as_str(), other_host.as_str()],
    );

    // Every round must ask the slow peer again: it was dropped, not failed
    for round in 1..=5 {
        let started = Instant::now();
        let mut found = paths(&store.find("a.*", &HeaderMap::new()).await.unwrap())
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        found.sort();
        assert!(started.elapsed() < Duration::from_millis(700));
        assert_eq!(found, vec!["a.fast", "a.other"]);
        assert!(store.remote_stores()[0].available(), "slow peer marked failed in round {}", round);
        assert_eq!(slow.calls(), round);
    }
}

#[tokio::test]
async fn test_late_answer_is_a_timeout_not_a_failure() {
    let mut slow = MockPeer::answering(json!([{"metric_path": "a.slow", "isLeaf": true}]));
    slow.delay = Duration::from_millis(800);
    let host = spawn_peer(slow).await;

    let config = FederationConfig {
        find_timeout_ms: 300,
        ..FederationConfig::default()
    };
    let remote = peers(&config, &[host.as_str()]).remove(0);

    let err = remote.find("a.*", &HeaderMap::new(), false).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "unexpected error: {}", err);
    assert!(!err.is_peer_failure());
    assert!(remote.available());
    assert!(remote.last_failure_ms().is_none());

    assert!(remote.find("a.*", &HeaderMap::new(), true).await.unwrap().is_empty());
    assert!(remote.available());
}

#[tokio::test]
async fn test_fetch_deadline_is_independent_of_find_timeout() {
    let mut peer = MockPeer::answering(json!([]));
    peer.delay = Duration::from_millis(500);
    let host = spawn_peer(peer).await;

    let config = FederationConfig {
        find_timeout_ms: 200,
        fetch_timeout_ms: 3000,
        ..FederationConfig::default()
    };
    let remote = peers(&config, &[host.as_str()]).remove(0);

    let series = remote
        .fetch(&["a.b".to_string()], 0, 120, None, &HeaderMap::new())
        .await
        .unwrap();
    assert_eq!(series.len(), 1);
    assert!(remote.available());
}

#[tokio::test]
async fn test_failing_peer_is_skipped_until_retry() {
    let mut peer = MockPeer::answering(json!([]));
    peer.find_status = StatusCode::INTERNAL_SERVER_ERROR;
    let host = spawn_peer(peer.clone()).await;

    let config = FederationConfig::default();
    let store = store(&config, &[host.as_str()]);

    let nodes = store.find("a.*", &HeaderMap::new()).await.unwrap();
    assert!(nodes.is_empty());
    assert_eq!(peer.calls(), 1);
    assert!(!store.remote_stores()[0].available());

    // Inside the retry window the peer costs no request
    let nodes = store.find("b.*", &HeaderMap::new()).await.unwrap();
    assert!(nodes.is_empty());
    assert_eq!(peer.calls(), 1);
}

#[tokio::test]
async fn test_breaker_reopens_after_retry_delay() {
    let peer = MockPeer::answering(json!([{"metric_path": "a.b", "isLeaf": true}]));
    let host = spawn_peer(peer.clone()).await;

    let config = FederationConfig {
        retry_delay_secs: 60,
        ..FederationConfig::default()
    };
    let store = store(&config, &[host.as_str()]);
    let remote = &store.remote_stores()[0];

    remote.fail_at(0);
    assert!(!remote.available_at(1_000));
    assert!(remote.available_at(61_000));

    // A failure far in the past leaves the peer eligible now
    let nodes = store.find("a.*", &HeaderMap::new()).await.unwrap();
    assert_eq!(paths(&nodes), vec!["a.b"]);
    assert_eq!(peer.calls(), 1);
}

#[tokio::test]
async fn test_cached_find_makes_no_request() {
    let peer = MockPeer::answering(json!([{"metric_path": "a.b", "isLeaf": false}]));
    let host = spawn_peer(peer.clone()).await;

    let config = FederationConfig::default();
    let store = store(&config, &[host.as_str()]);

    let first = store.find("a.*", &HeaderMap::new()).await.unwrap();
    let second = store.find("a.*", &HeaderMap::new()).await.unwrap();
    assert_eq!(paths(&first), paths(&second));
    assert!(!second[0].is_leaf());
    assert_eq!(peer.calls(), 1);
}

#[tokio::test]
async fn test_post_mode_sends_form_parameters() {
    let peer = MockPeer::answering(json!([{"metric_path": "a.b", "isLeaf": true}]));
    let host = spawn_peer(peer.clone()).await;

    let config = FederationConfig {
        use_post: true,
        ..FederationConfig::default()
    };
    let store = store(&config, &[host.as_str()]);

    store.find("a.*", &HeaderMap::new()).await.unwrap();
    let seen = peer.last();
    assert_eq!(seen.method, "POST");
    assert_eq!(seen.param("local"), Some("1"));
    assert_eq!(seen.param("format"), Some("json"));
    assert_eq!(seen.param("query"), Some("a.*"));
}

#[tokio::test]
async fn test_forwarded_headers_reach_peer() {
    let peer = MockPeer::answering(json!([]));
    let host = spawn_peer(peer.clone()).await;

    let config = FederationConfig {
        forward_headers: vec!["X-Grafana-Org-Id".to_string()],
        ..FederationConfig::default()
    };
    let store = store(&config, &[host.as_str()]);

    let mut incoming = HeaderMap::new();
    incoming.insert("x-grafana-org-id", HeaderValue::from_static("7"));
    incoming.insert("authorization", HeaderValue::from_static("Bearer secret"));
    let headers = extract_forward_headers(&incoming, &config.forward_headers);

    store.find("a.*", &headers).await.unwrap();
    let seen = peer.last();
    assert_eq!(seen.headers.get("x-grafana-org-id").unwrap(), "7");
    assert!(seen.headers.get("authorization").is_none());
}

// =============================================================================
// Fetch
// =============================================================================

#[tokio::test]
async fn test_remote_leaf_fetch() {
    let peer = MockPeer::answering(json!([{"metric_path": "a.b", "isLeaf": true}]));
    let host = spawn_peer(peer.clone()).await;

    let config = FederationConfig::default();
    let store = store(&config, &[host.as_str()]);

    let node = store.find_first("a.b", &HeaderMap::new()).await.unwrap().unwrap();
    match node.fetch(600, 720, Some(900)).await.unwrap() {
        FetchResult::Remote(series) => {
            assert_eq!(series.len(), 1);
            assert_eq!(series[0].name, "a.b");
            assert_eq!(series[0].values, vec![Some(1.0), None]);
        }
        other => panic!("unexpected fetch result: {:?}", other),
    }

    let seen = peer.last();
    assert_eq!(seen.path, "render");
    assert_eq!(seen.all("target"), vec!["a.b"]);
    assert_eq!(seen.param("from"), Some("600"));
    assert_eq!(seen.param("until"), Some("720"));
    assert_eq!(seen.param("now"), Some("900"));
}

#[tokio::test]
async fn test_bulk_fetch_uses_one_request() {
    let peer = MockPeer::answering(json!([]));
    let host = spawn_peer(peer.clone()).await;

    let config = FederationConfig {
        use_post: true,
        ..FederationConfig::default()
    };
    let remote = peers(&config, &[host.as_str()]).remove(0);
    let node = Node::RemoteLeafBulk(RemoteBulkNode::new(
        remote,
        vec!["a.b".to_string(), "a.c".to_string()],
    ));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    if let Node::RemoteLeafBulk(bulk) = &node {
        bulk.fetch_into(0, 120, None, &HeaderMap::new(), &tx).await.unwrap();
    }

    let (from_host, series) = rx.try_recv().unwrap();
    assert_eq!(from_host, host);
    assert_eq!(series.len(), 2);
    assert_eq!(peer.calls(), 1);
    assert_eq!(peer.last().all("target"), vec!["a.b", "a.c"]);
    assert!(peer.last().param("now").is_none());
}

#[tokio::test]
async fn test_fetch_failure_does_not_trip_breaker() {
    let mut peer = MockPeer::answering(json!([{"metric_path": "a.b", "isLeaf": true}]));
    peer.render_status = StatusCode::BAD_GATEWAY;
    let host = spawn_peer(peer.clone()).await;

    let config = FederationConfig::default();
    let store = store(&config, &[host.as_str()]);

    let node = store.find_first("a.b", &HeaderMap::new()).await.unwrap().unwrap();
    let err = node.fetch(0, 60, None).await.unwrap_err();
    assert!(err.is_peer_failure());
    assert!(store.remote_stores()[0].available());
}

#[tokio::test]
async fn test_remote_branch_fetch_is_empty() {
    let peer = MockPeer::answering(json!([{"metric_path": "a", "isLeaf": false}]));
    let host = spawn_peer(peer.clone()).await;

    let config = FederationConfig::default();
    let store = store(&config, &[host.as_str()]);

    let node = store.find_first("a", &HeaderMap::new()).await.unwrap().unwrap();
    assert!(node.fetch(0, 60, None).await.unwrap().is_empty());
    assert_eq!(peer.calls(), 1);
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_store_excludes_own_addresses() {
    let dir = TempDir::new().unwrap();
    let config = FederationConfig {
        data_dirs: vec![dir.path().to_path_buf()],
        cluster_servers: vec!["127.0.0.1:8080".to_string(), "192.0.2.44:8080".to_string()],
        ..FederationConfig::default()
    };
    let store = Store::new(&config, Backends::default(), Arc::new(LocalFindCache::default())).unwrap();

    assert_eq!(store.local_host(), "127.0.0.1:8080");
    let hosts: Vec<&str> = store.remote_stores().iter().map(|s| s.host()).collect();
    assert_eq!(hosts, vec!["192.0.2.44:8080"]);
}
