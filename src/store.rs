//! Federated metric store
//!
//! A [`Store`] answers namespace queries from its local roots and its cluster
//! peers. Exact paths stop at the first hit, local roots first; wildcard
//! queries scan local roots while a fan-out round queries the peers, and the
//! combined answer lists each metric path once.
//!
//! # Example
//!
//! ```rust,no_run
//! use kuba_finder::cache::LocalFindCache;
//! use kuba_finder::config::FederationConfig;
//! use kuba_finder::storage::Backends;
//! use kuba_finder::store::Store;
//! use reqwest::header::HeaderMap;
//! use std::sync::Arc;
//!
//! # async fn run() -> kuba_finder::Result<()> {
//! let config = FederationConfig::from_file_with_env("finder.toml")?;
//! let store = Store::new(&config, Backends::default(), Arc::new(LocalFindCache::default()))?;
//!
//! for node in store.find("servers.*.cpu", &HeaderMap::new()).await? {
//!     println!("{} leaf={}", node.metric_path(), node.is_leaf());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tracing::{debug, info};

use crate::cache::FindCache;
use crate::config::FederationConfig;
use crate::error::{Error, Result};
use crate::metrics::record_find;
use crate::node::{NativeFile, Node};
use crate::pattern::is_pattern;
use crate::remote::{is_local_interface, parallel_remote_find, PeerSettings, RemoteStore};
use crate::storage::backend::{Backends, NATIVE_EXTENSION};
use crate::storage::walker::find;

/// Host name reported when no cluster entry refers to this node
pub const DEFAULT_LOCAL_HOST: &str = "local";

/// Local roots plus cluster peers
pub struct Store {
    directories: Vec<PathBuf>,
    remote_stores: Vec<Arc<RemoteStore>>,
    local_host: String,
    backends: Backends,
    find_timeout: Duration,
    max_concurrent_finds: usize,
}

impl Store {
    /// Build a store from configuration
    ///
    /// Cluster entries that resolve to one of this machine's interfaces are
    /// dropped; the first of them names the local host.
    pub fn new(
        config: &FederationConfig,
        backends: Backends,
        cache: Arc<dyn FindCache>,
    ) -> Result<Self> {
        config.validate()?;

        let settings = Arc::new(PeerSettings::from_config(config)?);
        let mut local_host = None;
        let mut remote_stores = Vec::with_capacity(config.cluster_servers.len());

        for server in &config.cluster_servers {
            if is_local_interface(server)? {
                debug!(server = %server, "Excluding local cluster entry");
                local_host.get_or_insert_with(|| server.clone());
                continue;
            }
            remote_stores.push(Arc::new(RemoteStore::new(
                server.clone(),
                Arc::clone(&settings),
                Arc::clone(&cache),
            )));
        }

        info!(
            directories = config.data_dirs.len(),
            peers = remote_stores.len(),
            local_host = local_host.as_deref().unwrap_or(DEFAULT_LOCAL_HOST),
            "Federated store ready"
        );

        Ok(Self {
            directories: config.data_dirs.clone(),
            remote_stores,
            local_host: local_host.unwrap_or_else(|| DEFAULT_LOCAL_HOST.to_string()),
            backends: backends.configured(config),
            find_timeout: config.find_timeout(),
            max_concurrent_finds: config.max_concurrent_finds,
        })
    }

    /// Build a store from already constructed peers, skipping identity checks
    pub fn with_remote_stores(
        config: &FederationConfig,
        backends: Backends,
        remote_stores: Vec<Arc<RemoteStore>>,
    ) -> Result<Self> {
        if config.data_dirs.is_empty() && remote_stores.is_empty() {
            return Err(Error::Config(
                "no local directories and no cluster peers configured".to_string(),
            ));
        }

        Ok(Self {
            directories: config.data_dirs.clone(),
            remote_stores,
            local_host: DEFAULT_LOCAL_HOST.to_string(),
            backends: backends.configured(config),
            find_timeout: config.find_timeout(),
            max_concurrent_finds: config.max_concurrent_finds,
        })
    }

    /// Local roots in search order
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Peers queried by fan-out rounds
    pub fn remote_stores(&self) -> &[Arc<RemoteStore>] {
        &self.remote_stores
    }

    /// Cluster entry naming this node, or `"local"`
    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    /// Archive backends used for local leaves
    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Look up a plain native archive by exact metric path in the local roots
    #[deprecated(note = "use `find` with an exact path")]
    pub fn get(&self, metric_path: &str) -> Option<Node> {
        let relative = format!("{}{}", metric_path.replace('.', "/"), NATIVE_EXTENSION);
        self.directories.iter().find_map(|root| {
            let fs_path = root.join(&relative);
            fs_path.is_file().then(|| {
                Node::NativeFile(NativeFile::plain(
                    fs_path,
                    metric_path,
                    Arc::clone(&self.backends.native),
                ))
            })
        })
    }

    /// Find nodes matching `query`
    ///
    /// Wildcard queries collect every match; exact paths return at most one
    /// node.
    pub async fn find(&self, query: &str, headers: &HeaderMap) -> Result<Vec<Node>> {
        if is_pattern(query) {
            self.find_all(query, headers).await
        } else {
            Ok(self.find_first(query, headers).await?.into_iter().collect())
        }
    }

    /// First node for an exact path
    ///
    /// Local roots are searched in order without contacting peers; only a
    /// local miss starts a fan-out round.
    pub async fn find_first(&self, query: &str, headers: &HeaderMap) -> Result<Option<Node>> {
        if let Some(node) = self.scan_local(query, true).await?.into_iter().next() {
            record_find("local", true);
            return Ok(Some(node));
        }

        let results = parallel_remote_find(
            &self.remote_stores,
            query,
            headers,
            self.find_timeout,
            self.max_concurrent_finds,
        )
        .await;

        let node = results
            .into_iter()
            .find_map(|result| result.nodes.into_iter().next());
        record_find("remote", node.is_some());
        Ok(node)
    }

    /// Every node matching `query`, local results first
    pub async fn find_all(&self, query: &str, headers: &HeaderMap) -> Result<Vec<Node>> {
        let remote = parallel_remote_find(
            &self.remote_stores,
            query,
            headers,
            self.find_timeout,
            self.max_concurrent_finds,
        );
        let (local, remote) = tokio::join!(self.scan_local(query, false), remote);
        let local = local?;
        record_find("local", true);

        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(local.len());

        for node in local {
            if seen.insert(node.metric_path().to_string()) {
                nodes.push(node);
            }
        }

        let mut remote_count = 0;
        for result in remote {
            for node in result.nodes {
                if seen.insert(node.metric_path().to_string()) {
                    remote_count += 1;
                    nodes.push(node);
                }
            }
        }
        if !self.remote_stores.is_empty() {
            record_find("remote", true);
        }

        debug!(query = %query, total = nodes.len(), remote = remote_count, "Find complete");
        Ok(nodes)
    }

    async fn scan_local(&self, query: &str, first_only: bool) -> Result<Vec<Node>> {
        if self.directories.is_empty() {
            return Ok(Vec::new());
        }

        let directories = self.directories.clone();
        let backends = self.backends.clone();
        let query = query.to_string();

        tokio::task::spawn_blocking(move || {
            let mut nodes = Vec::new();
            for root in &directories {
                for node in find(root, &query, &backends) {
                    nodes.push(node);
                    if first_only {
                        return nodes;
                    }
                }
            }
            nodes
        })
        .await
        .map_err(|e| Error::Backend(format!("local find task failed: {}", e)))
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("directories", &self.directories)
            .field("remote_stores", &self.remote_stores)
            .field("local_host", &self.local_host)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalFindCache;
    use tempfile::TempDir;

    fn touch(root: &std::path::Path, relative: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    fn local_store(dirs: Vec<PathBuf>) -> Store {
        let config = FederationConfig {
            data_dirs: dirs,
            ..FederationConfig::default()
        };
        Store::new(&config, Backends::default(), Arc::new(LocalFindCache::default())).unwrap()
    }

    #[test]
    fn test_new_requires_a_source() {
        let config = FederationConfig::default();
        let err = Store::new(&config, Backends::default(), Arc::new(LocalFindCache::default()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Store::with_remote_stores(&config, Backends::default(), Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_loopback_peers_are_excluded() {
        let config = FederationConfig {
            cluster_servers: vec!["127.0.0.1:8080".into(), "127.0.0.1:9090".into()],
            ..FederationConfig::default()
        };
        let store =
            Store::new(&config, Backends::default(), Arc::new(LocalFindCache::default())).unwrap();
        assert!(store.remote_stores().is_empty());
        assert_eq!(store.local_host(), "127.0.0.1:8080");
    }

    #[test]
    fn test_default_local_host() {
        let dir = TempDir::new().unwrap();
        let store = local_store(vec![dir.path().to_path_buf()]);
        assert_eq!(store.local_host(), DEFAULT_LOCAL_HOST);
    }

    #[tokio::test]
    async fn test_exact_path_prefers_first_root() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        touch(a.path(), "app/cpu.wsp");
        touch(b.path(), "app/cpu.wsp");

        let store = local_store(vec![a.path().to_path_buf(), b.path().to_path_buf()]);
        let nodes = store.find("app.cpu", &HeaderMap::new()).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].fs_path(), Some(a.path().join("app/cpu.wsp").as_path()));
    }

    #[tokio::test]
    async fn test_find_all_dedups_across_roots() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        touch(a.path(), "app/cpu.wsp");
        touch(b.path(), "app/cpu.wsp");
        touch(b.path(), "app/mem.wsp");

        let store = local_store(vec![a.path().to_path_buf(), b.path().to_path_buf()]);
        let nodes = store.find("app.*", &HeaderMap::new()).await.unwrap();
        let paths: Vec<&str> = nodes.iter().map(|n| n.metric_path()).collect();
        assert_eq!(paths, vec!["app.cpu", "app.mem"]);
        assert_eq!(nodes[0].fs_path(), Some(a.path().join("app/cpu.wsp").as_path()));
    }

    #[tokio::test]
    async fn test_find_all_exact_path_over_two_roots() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        touch(a.path(), "app/cpu.wsp");
        touch(b.path(), "app/cpu.wsp");

        let store = local_store(vec![a.path().to_path_buf(), b.path().to_path_buf()]);
        let nodes = store.find_all("app.cpu", &HeaderMap::new()).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].metric_path(), "app.cpu");
        assert_eq!(nodes[0].fs_path(), Some(a.path().join("app/cpu.wsp").as_path()));
    }

    #[tokio::test]
    async fn test_exact_miss_without_peers() {
        let dir = TempDir::new().unwrap();
        let store = local_store(vec![dir.path().to_path_buf()]);
        assert!(store.find("no.such.metric", &HeaderMap::new()).await.unwrap().is_empty());
    }

    #[test]
    #[allow(deprecated)]
    fn test_get_native_archive() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "servers/web01/cpu.wsp");

        let store = local_store(vec![dir.path().to_path_buf()]);
        let node = store.get("servers.web01.cpu").unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.name(), "cpu");
        assert!(store.get("servers.web02.cpu").is_none());
    }
}
