//! Find result caching
//!
//! Peer find results are cached under a key derived from the peer host and the
//! query, so repeated finds within the TTL never reach the network. The cache
//! is a trait so a shared cache service can replace the in-process one.

use std::time::Duration;

use async_trait::async_trait;

use crate::remote::FindRecord;

/// In-process cache implementation
pub mod local;

pub use local::LocalFindCache;

/// Key-value store for peer find results
#[async_trait]
pub trait FindCache: Send + Sync {
    /// Cached records for `key`, `None` on a miss or an expired entry
    async fn get(&self, key: &str) -> Option<Vec<FindRecord>>;

    /// Store `records` under `key` for `ttl`
    async fn set(&self, key: String, records: Vec<FindRecord>, ttl: Duration);
}
