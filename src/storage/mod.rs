//! Local storage side of the finder
//!
//! # Key Components
//!
//! - **Walker**: matches queries against local root directories
//! - **Backends**: opaque readers for native and composite archives
//! - **Context**: per-leaf sidecar metadata
//!
//! # Example
//!
//! ```rust,no_run
//! use kuba_finder::storage::{find, Backends};
//! use std::path::Path;
//!
//! let backends = Backends::default();
//! for node in find(Path::new("/var/lib/whisper"), "servers.*.cpu", &backends) {
//!     println!("{} leaf={}", node.metric_path(), node.is_leaf());
//! }
//! ```

/// Archive backend interfaces
pub mod backend;
/// Lazily-loaded sidecar context
pub mod context;
/// Namespace walker and node classification
pub mod walker;

pub use backend::{
    ArchiveInfo, Backends, CompositeArchiveBackend, CompositeFetch, CompositeInfo,
    NativeArchiveBackend, RoundRobinArchive, UnavailableBackend,
};
pub use context::{Context, ContextStore};
pub use walker::{find, Find, NamespaceWalker, RawMatch};
