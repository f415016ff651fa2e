//! Nodes reported by cluster peers

use std::sync::Arc;

use reqwest::header::HeaderMap;
use tokio::sync::mpsc;

use super::local::last_segment;
use crate::error::Result;
use crate::remote::RemoteStore;
use crate::types::{FetchResult, RemoteSeries};

/// A finished remote fetch: the peer host and the series it returned
pub type FetchCompletion = (String, Vec<RemoteSeries>);

/// A node found on a peer
#[derive(Clone)]
pub struct RemoteNode {
    store: Arc<RemoteStore>,
    metric_path: String,
    name: String,
    is_leaf: bool,
}

impl RemoteNode {
    /// Create a node owned by `store`
    pub fn new(store: Arc<RemoteStore>, metric_path: impl Into<String>, is_leaf: bool) -> Self {
        let metric_path = metric_path.into();
        Self {
            store,
            name: last_segment(&metric_path).to_string(),
            metric_path,
            is_leaf,
        }
    }

    /// Peer the node was found on
    pub fn store(&self) -> &Arc<RemoteStore> {
        &self.store
    }

    /// Peer address
    pub fn host(&self) -> &str {
        self.store.host()
    }

    /// Metric path on the peer
    pub fn metric_path(&self) -> &str {
        &self.metric_path
    }

    /// Last segment of the metric path
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the peer reported the node as fetchable
    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// Ask the peer to render this node
    pub async fn fetch(
        &self,
        start: i64,
        end: i64,
        now: Option<i64>,
        headers: &HeaderMap,
    ) -> Result<FetchResult> {
        if !self.is_leaf {
            return Ok(FetchResult::Empty);
        }
        let targets = [self.metric_path.clone()];
        let series = self.store.fetch(&targets, start, end, now, headers).await?;
        Ok(FetchResult::Remote(series))
    }

    /// Fetch and report the result on `completions` instead of returning it
    pub async fn fetch_into(
        &self,
        start: i64,
        end: i64,
        now: Option<i64>,
        headers: &HeaderMap,
        completions: &mpsc::UnboundedSender<FetchCompletion>,
    ) -> Result<()> {
        let series = match self.fetch(start, end, now, headers).await? {
            FetchResult::Remote(series) => series,
            _ => Vec::new(),
        };
        // A dropped receiver only means nobody waits for the result
        let _ = completions.send((self.host().to_string(), series));
        Ok(())
    }
}

/// Several leaves on the same peer, fetched with one request
#[derive(Clone)]
pub struct RemoteBulkNode {
    store: Arc<RemoteStore>,
    metric_paths: Vec<String>,
    label: String,
    name: String,
}

impl RemoteBulkNode {
    /// Group `metric_paths` found on `store`
    pub fn new(store: Arc<RemoteStore>, metric_paths: Vec<String>) -> Self {
        let label = metric_paths.join(",");
        Self {
            store,
            name: format!("Bulk: {}", metric_paths.join(", ")),
            metric_paths,
            label,
        }
    }

    /// Peer the leaves were found on
    pub fn host(&self) -> &str {
        self.store.host()
    }

    /// Member metric paths
    pub fn metric_paths(&self) -> &[String] {
        &self.metric_paths
    }

    /// Comma-joined member paths
    pub fn metric_path(&self) -> &str {
        &self.label
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render every member in a single request
    pub async fn fetch(
        &self,
        start: i64,
        end: i64,
        now: Option<i64>,
        headers: &HeaderMap,
    ) -> Result<FetchResult> {
        if self.metric_paths.is_empty() {
            return Ok(FetchResult::Empty);
        }
        let series = self
            .store
            .fetch(&self.metric_paths, start, end, now, headers)
            .await?;
        Ok(FetchResult::Remote(series))
    }

    /// Fetch and report the result on `completions`
    pub async fn fetch_into(
        &self,
        start: i64,
        end: i64,
        now: Option<i64>,
        headers: &HeaderMap,
        completions: &mpsc::UnboundedSender<FetchCompletion>,
    ) -> Result<()> {
        let series = match self.fetch(start, end, now, headers).await? {
            FetchResult::Remote(series) => series,
            _ => Vec::new(),
        };
        let _ = completions.send((self.host().to_string(), series));
        Ok(())
    }
}
