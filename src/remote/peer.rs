//! Cluster peers
//!
//! A [`RemoteStore`] is one peer plus its circuit breaker. A connect or
//! protocol failure during a find marks the peer failed; the peer is skipped
//! until `retry_delay` has elapsed since the most recent failure. A request
//! that connected but ran past its deadline does not mark the peer. Any
//! number of concurrent requests may record failures, the newest timestamp
//! wins.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::Client;
use tracing::{debug, warn};

use super::protocol::{
    cache_key, decode_fetch, decode_find, fetch_params, find_params, FindRecord, QueryParams,
    FIND_PATH, RENDER_PATH,
};
use crate::cache::FindCache;
use crate::config::FederationConfig;
use crate::error::{Error, Result};
use crate::metrics::{record_cache_lookup, record_peer_failure, record_remote_fetch};
use crate::node::{Node, RemoteNode};
use crate::types::RemoteSeries;

const NEVER_FAILED: i64 = i64::MIN;

/// Current unix time in milliseconds
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Transport settings shared by every peer
pub struct PeerSettings {
    retry_delay: Duration,
    find_timeout: Duration,
    fetch_timeout: Duration,
    find_cache_ttl: Duration,
    use_post: bool,
    find_client: Client,
    fetch_client: Client,
}

impl PeerSettings {
    /// Build settings and the HTTP clients from configuration
    ///
    /// Finds and fetches get separate clients so each connect phase is bound
    /// by its own timeout.
    pub fn from_config(config: &FederationConfig) -> Result<Self> {
        Ok(Self {
            retry_delay: config.retry_delay(),
            find_timeout: config.find_timeout(),
            fetch_timeout: config.fetch_timeout(),
            find_cache_ttl: config.find_cache_ttl(),
            use_post: config.use_post,
            find_client: build_client(config.find_timeout())?,
            fetch_client: build_client(config.fetch_timeout())?,
        })
    }

    /// Minimum time a failed peer is skipped
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Per-request find timeout
    pub fn find_timeout(&self) -> Duration {
        self.find_timeout
    }

    /// Per-request fetch timeout
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Lifetime of cached find results
    pub fn find_cache_ttl(&self) -> Duration {
        self.find_cache_ttl
    }

    /// True when parameters travel as a form body
    pub fn use_post(&self) -> bool {
        self.use_post
    }
}

fn build_client(connect_timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))
}

/// One cluster peer
pub struct RemoteStore {
    host: String,
    last_failure_ms: AtomicI64,
    settings: Arc<PeerSettings>,
    cache: Arc<dyn FindCache>,
}

impl RemoteStore {
    /// Peer at `host` (`host` or `host:port`)
    pub fn new(
        host: impl Into<String>,
        settings: Arc<PeerSettings>,
        cache: Arc<dyn FindCache>,
    ) -> Self {
        Self {
            host: host.into(),
            last_failure_ms: AtomicI64::new(NEVER_FAILED),
            settings,
            cache,
        }
    }

    /// Peer address
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Shared transport settings
    pub fn settings(&self) -> &PeerSettings {
        &self.settings
    }

    /// Whether the peer may be queried now
    pub fn available(&self) -> bool {
        self.available_at(now_ms())
    }

    /// Whether the peer may be queried at `now_ms`
    ///
    /// A peer becomes eligible again exactly `retry_delay` after its most
    /// recent failure.
    pub fn available_at(&self, now_ms: i64) -> bool {
        let last = self.last_failure_ms.load(Ordering::Acquire);
        if last == NEVER_FAILED {
            return true;
        }
        let retry_ms = i64::try_from(self.settings.retry_delay.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(last) >= retry_ms
    }

    /// Record a failure now
    pub fn fail(&self) {
        self.fail_at(now_ms());
    }

    /// Record a failure at `now_ms`
    pub fn fail_at(&self, now_ms: i64) {
        self.last_failure_ms.store(now_ms, Ordering::Release);
    }

    /// Time of the most recent failure, in unix milliseconds
    pub fn last_failure_ms(&self) -> Option<i64> {
        match self.last_failure_ms.load(Ordering::Acquire) {
            NEVER_FAILED => None,
            ms => Some(ms),
        }
    }

    /// Build a find request for `query`
    pub fn find_request(self: &Arc<Self>, query: impl Into<String>) -> FindRequest {
        FindRequest::new(Arc::clone(self), query.into())
    }

    /// Find `query` on this peer
    ///
    /// With `suppress_errors` a failed peer yields no nodes instead of an
    /// error; the failure is recorded either way.
    pub async fn find(
        self: &Arc<Self>,
        query: &str,
        headers: &HeaderMap,
        suppress_errors: bool,
    ) -> Result<Vec<Node>> {
        self.find_request(query).send(headers, suppress_errors).await
    }

    /// Render `targets` over `[from, until)` on this peer
    ///
    /// Fetch failures are returned to the caller and do not mark the peer
    /// failed.
    pub async fn fetch(
        &self,
        targets: &[String],
        from: i64,
        until: i64,
        now: Option<i64>,
        headers: &HeaderMap,
    ) -> Result<Vec<RemoteSeries>> {
        let params = fetch_params(targets, from, until, now);
        let settings = &self.settings;
        let result = match self
            .request(
                &settings.fetch_client,
                RENDER_PATH,
                &params,
                headers,
                settings.fetch_timeout,
            )
            .await
        {
            Ok(body) => decode_fetch(&self.host, &body),
            Err(e) => Err(e),
        };

        record_remote_fetch(result.is_ok());
        if let Err(e) = &result {
            warn!(host = %self.host, targets = targets.len(), error = %e, "Remote fetch failed");
        }
        result
    }

    async fn request(
        &self,
        client: &Client,
        path: &str,
        params: &QueryParams,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<Bytes> {
        let url = format!("http://{}{}", self.host, path);
        let builder = if self.settings.use_post {
            client.post(&url).form(params)
        } else {
            client.get(&url).query(params)
        };

        let response = builder
            .headers(headers.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::protocol(
                &self.host,
                format!("{} returned {}", path, status),
            ));
        }

        response.bytes().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        // A connect timeout reports both flags
        if e.is_connect() {
            Error::connect(&self.host, e)
        } else if e.is_timeout() {
            Error::timeout(&self.host, e)
        } else if e.is_request() {
            Error::connect(&self.host, e)
        } else {
            Error::protocol(&self.host, e)
        }
    }
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("host", &self.host)
            .field("last_failure_ms", &self.last_failure_ms())
            .finish()
    }
}

/// A single find against one peer, keyed for caching
pub struct FindRequest {
    store: Arc<RemoteStore>,
    query: String,
    cache_key: String,
}

impl FindRequest {
    fn new(store: Arc<RemoteStore>, query: String) -> Self {
        Self {
            cache_key: cache_key(&store.host, &query),
            store,
            query,
        }
    }

    /// Query pattern
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Cache key for this host and query
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Resolve the request from cache or the network
    pub async fn send(&self, headers: &HeaderMap, suppress_errors: bool) -> Result<Vec<Node>> {
        let store = &self.store;

        if let Some(records) = store.cache.get(&self.cache_key).await {
            if !records.is_empty() {
                record_cache_lookup(true);
                debug!(host = %store.host, query = %self.query, "Find served from cache");
                return Ok(self.nodes(records));
            }
        }
        record_cache_lookup(false);

        match self.records(headers).await {
            Ok(records) => {
                store
                    .cache
                    .set(
                        self.cache_key.clone(),
                        records.clone(),
                        store.settings.find_cache_ttl,
                    )
                    .await;
                debug!(host = %store.host, query = %self.query, count = records.len(), "Remote find complete");
                Ok(self.nodes(records))
            }
            Err(e) => {
                record_peer_failure(&store.host, e.kind());
                if e.is_peer_failure() {
                    store.fail();
                    warn!(host = %store.host, query = %self.query, error = %e, "Remote find failed, marking peer");
                } else {
                    warn!(host = %store.host, query = %self.query, error = %e, "Remote find timed out");
                }
                if suppress_errors {
                    Ok(Vec::new())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn records(&self, headers: &HeaderMap) -> Result<Vec<FindRecord>> {
        let settings = &self.store.settings;
        let body = self
            .store
            .request(
                &settings.find_client,
                FIND_PATH,
                &find_params(&self.query),
                headers,
                settings.find_timeout,
            )
            .await?;
        decode_find(&self.store.host, &body)
    }

    fn nodes(&self, records: Vec<FindRecord>) -> Vec<Node> {
        records
            .into_iter()
            .map(|r| {
                Node::RemoteLeaf(RemoteNode::new(
                    Arc::clone(&self.store),
                    r.metric_path,
                    r.is_leaf,
                ))
            })
            .collect()
    }
}
