//! Kuba Finder - federated metric namespace search
//!
//! This library answers Graphite-style namespace queries across:
//! - Local archive roots, walked level by level with glob and brace patterns
//! - Cluster peers, queried in parallel within one time budget
//! - A per-peer circuit breaker and a TTL find cache
//!
//! Every result is a [`Node`](node::Node) that can report its metric path,
//! whether it is a leaf, its available data windows, and fetch its series.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod pattern;
pub mod storage;
pub mod types;

/// Prometheus metrics for finds, peers and the cache
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Find result caching
pub mod cache;

/// Local and remote namespace nodes
pub mod node;

/// Cluster peer access: breaker, protocol and fan-out
pub mod remote;

/// Federated store combining local roots and peers
pub mod store;

// Re-export main types
pub use config::FederationConfig;
pub use error::{Error, Result};
pub use node::Node;
pub use store::Store;
pub use types::{FetchResult, Interval, TimeInfo};
