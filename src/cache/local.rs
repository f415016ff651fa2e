//! In-process find cache
//!
//! Keeps peer find results in memory with a per-entry TTL and a bounded entry
//! count. When full, expired entries go first, then the entry closest to
//! expiry.
//!
//! # Example
//!
//! ```rust,no_run
//! use kuba_finder::cache::{FindCache, LocalFindCache};
//! use kuba_finder::remote::FindRecord;
//! use std::time::Duration;
//!
//! # async fn run() {
//! let cache = LocalFindCache::new(1000);
//! cache
//!     .set("key".into(), vec![FindRecord::new("a.b", true)], Duration::from_secs(60))
//!     .await;
//! assert!(cache.get("key").await.is_some());
//! # }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::FindCache;
use crate::remote::FindRecord;

/// Default entry bound
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Upper bound on stored TTLs
const MAX_TTL_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Clone, Debug)]
struct CacheEntry {
    records: Vec<FindRecord>,
    expires_at_ms: i64,
}

impl CacheEntry {
    fn new(records: Vec<FindRecord>, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis())
            .unwrap_or(MAX_TTL_MS)
            .min(MAX_TTL_MS);
        Self {
            records,
            expires_at_ms: Utc::now().timestamp_millis() + ttl_ms,
        }
    }

    fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Bounded in-memory [`FindCache`]
pub struct LocalFindCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_entries: usize,
}

impl LocalFindCache {
    /// Cache holding at most `max_entries` queries
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Stored entry count, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop one entry
    pub async fn remove(&self, key: &str) -> Option<Vec<FindRecord>> {
        self.entries.write().await.remove(key).map(|e| e.records)
    }

    /// Drop everything
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now().timestamp_millis();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        before - entries.len()
    }

    /// Entry bound
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

impl Default for LocalFindCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl FindCache for LocalFindCache {
    async fn get(&self, key: &str) -> Option<Vec<FindRecord>> {
        let now = Utc::now().timestamp_millis();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| !e.is_expired_at(now))
            .map(|e| e.records.clone())
    }

    async fn set(&self, key: String, records: Vec<FindRecord>, ttl: Duration) {
        let now = Utc::now().timestamp_millis();
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, e| !e.is_expired_at(now));

            if entries.len() >= self.max_entries {
                let soonest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at_ms)
                    .map(|(k, _)| k.clone());
                if let Some(k) = soonest {
                    entries.remove(&k);
                }
            }
        }

        entries.insert(key, CacheEntry::new(records, ttl));
    }
}
