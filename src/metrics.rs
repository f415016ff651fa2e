//! Metrics and telemetry for the finder
//!
//! Prometheus metrics covering find traffic, peer health, the find cache and
//! fan-out rounds.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, CounterVec, Encoder, Histogram, TextEncoder,
};

lazy_static! {
    // === Find traffic ===

    /// Find operations by source and outcome
    pub static ref FINDS_TOTAL: CounterVec = register_counter_vec!(
        "finder_finds_total",
        "Total find operations",
        &["source", "status"]
    ).unwrap();

    /// Peer fetch operations by outcome
    pub static ref REMOTE_FETCHES_TOTAL: CounterVec = register_counter_vec!(
        "finder_remote_fetches_total",
        "Total remote fetch operations",
        &["status"]
    ).unwrap();

    // === Peer health ===

    /// Peer failures by host and error kind
    pub static ref PEER_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "finder_peer_failures_total",
        "Total peer failures by host and kind",
        &["host", "kind"]
    ).unwrap();

    /// Peers skipped because their circuit breaker was open
    pub static ref PEERS_SKIPPED_TOTAL: CounterVec = register_counter_vec!(
        "finder_peers_skipped_total",
        "Peers skipped while in backoff",
        &["host"]
    ).unwrap();

    // === Cache ===

    /// Find cache lookups by result
    pub static ref FIND_CACHE_TOTAL: CounterVec = register_counter_vec!(
        "finder_find_cache_total",
        "Find cache lookups",
        &["result"]
    ).unwrap();

    // === Fan-out ===

    /// Fan-out round duration
    pub static ref FANOUT_DURATION: Histogram = register_histogram!(
        "finder_fanout_duration_seconds",
        "Fan-out round latency in seconds",
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();

    /// Workers still running when the round budget expired
    pub static ref FANOUT_ABANDONED_TOTAL: CounterVec = register_counter_vec!(
        "finder_fanout_abandoned_total",
        "Peer workers abandoned at the round budget",
        &["round"]
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a find answered by `source` ("local" or "remote")
#[inline]
pub fn record_find(source: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    FINDS_TOTAL.with_label_values(&[source, status]).inc();
}

/// Record a remote fetch
#[inline]
pub fn record_remote_fetch(success: bool) {
    let status = if success { "success" } else { "error" };
    REMOTE_FETCHES_TOTAL.with_label_values(&[status]).inc();
}

/// Record a peer failure
#[inline]
pub fn record_peer_failure(host: &str, kind: &str) {
    PEER_FAILURES_TOTAL.with_label_values(&[host, kind]).inc();
}

/// Record a peer skipped by its circuit breaker
#[inline]
pub fn record_peer_skipped(host: &str) {
    PEERS_SKIPPED_TOTAL.with_label_values(&[host]).inc();
}

/// Record a find cache lookup
#[inline]
pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    FIND_CACHE_TOTAL.with_label_values(&[result]).inc();
}

/// Record a completed fan-out round
#[inline]
pub fn record_fanout(duration_secs: f64, abandoned: usize) {
    FANOUT_DURATION.observe(duration_secs);
    if abandoned > 0 {
        FANOUT_ABANDONED_TOTAL
            .with_label_values(&["find"])
            .inc_by(abandoned as f64);
    }
}
