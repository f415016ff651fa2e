//! Cluster peer access
//!
//! # Key Components
//!
//! - **RemoteStore**: one peer with its circuit breaker and find cache
//! - **FindRequest**: a cached, failure-tracked find against one peer
//! - **parallel_remote_find**: a bounded, time-boxed fan-out round
//! - **protocol**: request parameters and response decoding
//!
//! # Example
//!
//! ```rust,no_run
//! use kuba_finder::cache::LocalFindCache;
//! use kuba_finder::config::FederationConfig;
//! use kuba_finder::remote::{parallel_remote_find, PeerSettings, RemoteStore};
//! use reqwest::header::HeaderMap;
//! use std::sync::Arc;
//!
//! # async fn run() -> kuba_finder::Result<()> {
//! let config = FederationConfig::default();
//! let settings = Arc::new(PeerSettings::from_config(&config)?);
//! let cache = Arc::new(LocalFindCache::default());
//! let peers = vec![Arc::new(RemoteStore::new("10.0.0.2:8080", settings, cache))];
//!
//! for result in parallel_remote_find(&peers, "servers.*", &HeaderMap::new(), config.find_timeout(), 32).await {
//!     println!("{}: {} nodes", result.host, result.nodes.len());
//! }
//! # Ok(())
//! # }
//! ```

/// Parallel find rounds
pub mod fanout;
/// Header forwarding
pub mod headers;
/// Local interface detection
pub mod identity;
/// Peers and the circuit breaker
pub mod peer;
/// Wire protocol
pub mod protocol;

pub use fanout::{parallel_remote_find, FindResults};
pub use headers::extract_forward_headers;
pub use identity::is_local_interface;
pub use peer::{FindRequest, PeerSettings, RemoteStore};
pub use protocol::FindRecord;
