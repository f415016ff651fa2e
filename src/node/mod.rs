//! Metric namespace nodes
//!
//! Every result of a find is a [`Node`]: a branch (directory, composite
//! archive, remote branch) or a leaf (native archive, composite data source,
//! remote leaf). Nodes are a closed set, so capabilities are methods on the
//! enum rather than a trait object hierarchy.
//!
//! # Example
//!
//! ```rust,no_run
//! use kuba_finder::node::Node;
//!
//! async fn show(node: &Node) -> kuba_finder::Result<()> {
//!     if node.is_leaf() {
//!         let data = node.fetch(0, 3600, None).await?;
//!         println!("{} -> {:?}", node.metric_path(), data);
//!     }
//!     Ok(())
//! }
//! ```

mod composite;
mod local;
mod remote;

use std::fmt;
use std::path::Path;

use reqwest::header::HeaderMap;

use crate::error::{Error, Result};
use crate::storage::context::Context;
use crate::types::{FetchResult, Interval};

pub use composite::{CompositeArchive, CompositeArchiveSeries};
pub use local::{DirectoryNode, NativeFile};
pub use remote::{FetchCompletion, RemoteBulkNode, RemoteNode};

/// A node in the federated metric namespace
#[derive(Clone)]
pub enum Node {
    /// Local directory, always a branch
    Directory(DirectoryNode),
    /// Plain native archive
    NativeFile(NativeFile),
    /// Gzip-compressed native archive
    CompressedNativeFile(NativeFile),
    /// Composite archive file, a branch over its data sources
    CompositeArchive(CompositeArchive),
    /// One data source of a composite archive
    CompositeArchiveSeries(CompositeArchiveSeries),
    /// Node reported by a peer; a leaf or a branch
    RemoteLeaf(RemoteNode),
    /// Several remote leaves fetched in one request
    RemoteLeafBulk(RemoteBulkNode),
}

impl Node {
    /// Dotted metric path
    pub fn metric_path(&self) -> &str {
        match self {
            Node::Directory(n) => n.metric_path(),
            Node::NativeFile(n) | Node::CompressedNativeFile(n) => n.metric_path(),
            Node::CompositeArchive(n) => n.metric_path(),
            Node::CompositeArchiveSeries(n) => n.metric_path(),
            Node::RemoteLeaf(n) => n.metric_path(),
            Node::RemoteLeafBulk(n) => n.metric_path(),
        }
    }

    /// Metric path after symlink resolution; equal to `metric_path` except
    /// for native archives reached through a symlink
    pub fn real_metric(&self) -> &str {
        match self {
            Node::NativeFile(n) | Node::CompressedNativeFile(n) => n.real_metric(),
            other => other.metric_path(),
        }
    }

    /// Last segment of the metric path
    pub fn name(&self) -> &str {
        match self {
            Node::Directory(n) => n.name(),
            Node::NativeFile(n) | Node::CompressedNativeFile(n) => n.name(),
            Node::CompositeArchive(n) => n.name(),
            Node::CompositeArchiveSeries(n) => n.name(),
            Node::RemoteLeaf(n) => n.name(),
            Node::RemoteLeafBulk(n) => n.name(),
        }
    }

    /// True when the node holds data
    pub fn is_leaf(&self) -> bool {
        match self {
            Node::Directory(_) | Node::CompositeArchive(_) => false,
            Node::NativeFile(_) | Node::CompressedNativeFile(_) => true,
            Node::CompositeArchiveSeries(_) | Node::RemoteLeafBulk(_) => true,
            Node::RemoteLeaf(n) => n.is_leaf(),
        }
    }

    /// True for nodes backed by a local root
    pub fn is_local(&self) -> bool {
        !matches!(self, Node::RemoteLeaf(_) | Node::RemoteLeafBulk(_))
    }

    /// Physical file or directory of a local node
    pub fn fs_path(&self) -> Option<&Path> {
        match self {
            Node::Directory(n) => Some(n.fs_path()),
            Node::NativeFile(n) | Node::CompressedNativeFile(n) => Some(n.fs_path()),
            Node::CompositeArchive(n) => Some(n.fs_path()),
            Node::CompositeArchiveSeries(n) => Some(n.fs_path()),
            Node::RemoteLeaf(_) | Node::RemoteLeafBulk(_) => None,
        }
    }

    /// Variant name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Directory(_) => "directory",
            Node::NativeFile(_) => "native",
            Node::CompressedNativeFile(_) => "compressed_native",
            Node::CompositeArchive(_) => "composite_archive",
            Node::CompositeArchiveSeries(_) => "composite_series",
            Node::RemoteLeaf(_) => "remote",
            Node::RemoteLeafBulk(_) => "remote_bulk",
        }
    }

    /// Fetch `[start, end)` with no forwarded headers
    pub async fn fetch(&self, start: i64, end: i64, now: Option<i64>) -> Result<FetchResult> {
        self.fetch_with_headers(start, end, now, &HeaderMap::new())
            .await
    }

    /// Fetch `[start, end)`, forwarding `headers` on remote requests
    ///
    /// Local archive reads run on the blocking pool. Branches return
    /// [`FetchResult::Empty`].
    pub async fn fetch_with_headers(
        &self,
        start: i64,
        end: i64,
        now: Option<i64>,
        headers: &HeaderMap,
    ) -> Result<FetchResult> {
        match self {
            Node::RemoteLeaf(n) => n.fetch(start, end, now, headers).await,
            Node::RemoteLeafBulk(n) => n.fetch(start, end, now, headers).await,
            Node::Directory(_) | Node::CompositeArchive(_) => Ok(FetchResult::Empty),
            local => {
                let node = local.clone();
                tokio::task::spawn_blocking(move || node.fetch_blocking(start, end, now))
                    .await
                    .map_err(|e| Error::Backend(format!("fetch task failed: {}", e)))?
            }
        }
    }

    /// Fetch a local node on the current thread
    pub fn fetch_blocking(&self, start: i64, end: i64, now: Option<i64>) -> Result<FetchResult> {
        match self {
            Node::Directory(_) | Node::CompositeArchive(_) => Ok(FetchResult::Empty),
            Node::NativeFile(n) | Node::CompressedNativeFile(n) => n.fetch(start, end, now),
            Node::CompositeArchiveSeries(n) => n.fetch(start, end),
            Node::RemoteLeaf(_) | Node::RemoteLeafBulk(_) => Err(Error::Unsupported(format!(
                "blocking fetch of remote node {}",
                self.metric_path()
            ))),
        }
    }

    /// Windows of available data; branches and remote nodes report none
    pub fn intervals(&self) -> Result<Vec<Interval>> {
        match self {
            Node::NativeFile(n) | Node::CompressedNativeFile(n) => n.intervals(),
            Node::CompositeArchiveSeries(n) => n.intervals(),
            _ => Ok(Vec::new()),
        }
    }

    /// Sidecar context; empty for nodes without one
    pub fn context(&self) -> Result<Context> {
        match self {
            Node::NativeFile(n) | Node::CompressedNativeFile(n) => n.context(),
            _ => Ok(Context::new()),
        }
    }

    /// Merge `patch` into the sidecar context
    pub fn update_context(&self, patch: Context) -> Result<()> {
        match self {
            Node::NativeFile(n) | Node::CompressedNativeFile(n) => n.update_context(patch),
            other => Err(Error::Unsupported(format!(
                "{} node {} has no context",
                other.kind(),
                other.metric_path()
            ))),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind())
            .field("metric_path", &self.metric_path())
            .field("is_leaf", &self.is_leaf())
            .finish()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.metric_path())
    }
}
