//! Parallel find across peers
//!
//! One round sends the same query to every available peer at once and waits
//! at most `budget` for answers. Peers that answer late are abandoned: their
//! workers are aborted and whatever arrived before the deadline is returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use reqwest::header::HeaderMap;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info};

use super::peer::RemoteStore;
use crate::metrics::{record_fanout, record_peer_skipped};
use crate::node::Node;

/// Nodes returned by one peer
#[derive(Debug, Clone)]
pub struct FindResults {
    /// Peer that answered
    pub host: String,
    /// Nodes it reported
    pub nodes: Vec<Node>,
}

/// Query every available peer in parallel within `budget`
///
/// At most `max_concurrent` requests are in flight. Peers inside their
/// retry window are skipped without a request. Results arrive in completion
/// order.
pub async fn parallel_remote_find(
    stores: &[Arc<RemoteStore>],
    query: &str,
    headers: &HeaderMap,
    budget: Duration,
    max_concurrent: usize,
) -> Vec<FindResults> {
    let started = Instant::now();
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut workers = Vec::with_capacity(stores.len());
    for store in stores {
        if !store.available() {
            record_peer_skipped(store.host());
            debug!(host = %store.host(), "Skipping peer inside retry window");
            continue;
        }

        let store = Arc::clone(store);
        let query = query.to_string();
        let headers = headers.clone();
        let permits = Arc::clone(&permits);
        let tx = tx.clone();
        workers.push(tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let nodes = store.find(&query, &headers, true).await.unwrap_or_default();
            let _ = tx.send(FindResults {
                host: store.host().to_string(),
                nodes,
            });
        }));
    }
    drop(tx);

    let launched = workers.len();
    let _ = tokio::time::timeout(budget, join_all(workers.iter_mut())).await;

    let mut abandoned = 0;
    for worker in &workers {
        if !worker.is_finished() {
            worker.abort();
            abandoned += 1;
        }
    }

    let mut results = Vec::with_capacity(launched);
    while let Ok(result) = rx.try_recv() {
        results.push(result);
    }

    let elapsed = started.elapsed();
    record_fanout(elapsed.as_secs_f64(), abandoned);
    if abandoned > 0 {
        info!(
            query = %query,
            launched,
            abandoned,
            elapsed_ms = elapsed.as_millis() as u64,
            "Remote find round timed out"
        );
    } else {
        debug!(query = %query, launched, elapsed_ms = elapsed.as_millis() as u64, "Remote find round complete");
    }

    results
}
