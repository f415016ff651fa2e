//! Namespace walker for local roots
//!
//! Matches a dot-delimited query against a directory tree, one segment per
//! level, and classifies each hit into a [`Node`].
//!
//! ```text
//! query  servers.{web,db}01.cpu
//! root/
//! ├── servers/            segment 0: "servers"
//! │   ├── web01/          segment 1: "{web,db}01"
//! │   │   └── cpu.wsp     segment 2: "cpu" + ".*"  → NativeFile servers.web01.cpu
//! │   └── db01/
//! │       └── cpu.wsp                              → NativeFile servers.db01.cpu
//! ```
//!
//! Traversal is depth-first and lazy: a caller that only wants the first match
//! stops the walk there. A directory that cannot be listed contributes no
//! entries; its siblings are still visited.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::backend::{Backends, COMPOSITE_EXTENSION};
use crate::node::{CompositeArchive, DirectoryNode, NativeFile, Node};
use crate::pattern::{escaped_pattern_fields, match_entries, matches, strip_escapes};

/// A path matched by the walker, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawMatch {
    /// A file or directory matched by the final segment
    Path(PathBuf),
    /// A composite archive whose data sources are matched by `series_pattern`
    Composite {
        /// Composite archive file
        archive: PathBuf,
        /// Final query segment, applied to data source names
        series_pattern: String,
    },
}

enum Work {
    Visit { dir: PathBuf, depth: usize },
    Yield(RawMatch),
}

/// Depth-first iterator of raw matches under one directory
pub struct NamespaceWalker {
    patterns: Vec<String>,
    composite: bool,
    stack: Vec<Work>,
}

impl NamespaceWalker {
    /// Walk `root` with one pattern per path level
    ///
    /// `composite` enables matching `<segment>.rrd` files one level above the
    /// final segment.
    pub fn new(root: &Path, patterns: Vec<String>, composite: bool) -> Self {
        let stack = if patterns.is_empty() {
            Vec::new()
        } else {
            vec![Work::Visit {
                dir: root.to_path_buf(),
                depth: 0,
            }]
        };

        Self {
            patterns,
            composite,
            stack,
        }
    }

    fn expand(&mut self, dir: &Path, depth: usize) {
        let pattern = &self.patterns[depth];
        let remaining = self.patterns.len() - depth - 1;
        let (subdirs, files) = list_entries(dir);
        let matching_subdirs = match_entries(&subdirs, pattern);

        let mut work = Vec::new();

        // The last segment may name a data source inside a composite archive
        if remaining == 1 && self.composite {
            let archives = match_entries(&files, &format!("{}{}", pattern, COMPOSITE_EXTENSION));
            for archive in archives {
                work.push(Work::Yield(RawMatch::Composite {
                    archive: dir.join(archive),
                    series_pattern: self.patterns[depth + 1].clone(),
                }));
            }
        }

        if remaining > 0 {
            for subdir in matching_subdirs {
                work.push(Work::Visit {
                    dir: dir.join(subdir),
                    depth: depth + 1,
                });
            }
        } else {
            let matching_files = match_entries(&files, &format!("{}.*", pattern));
            for name in matching_files.into_iter().chain(matching_subdirs) {
                work.push(Work::Yield(RawMatch::Path(dir.join(name))));
            }
        }

        self.stack.extend(work.into_iter().rev());
    }
}

impl Iterator for NamespaceWalker {
    type Item = RawMatch;

    fn next(&mut self) -> Option<RawMatch> {
        while let Some(work) = self.stack.pop() {
            match work {
                Work::Yield(raw) => return Some(raw),
                Work::Visit { dir, depth } => self.expand(&dir, depth),
            }
        }
        None
    }
}

/// Split the entries of `dir` into directory names and file names
///
/// Listing failures are logged and yield no entries.
fn list_entries(dir: &Path) -> (Vec<String>, Vec<String>) {
    let mut subdirs = Vec::new();
    let mut files = Vec::new();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to list directory");
            return (subdirs, files);
        },
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to read directory entry");
                continue;
            },
        };

        let Ok(name) = entry.file_name().into_string() else {
            debug!(dir = %dir.display(), "Skipping non UTF-8 entry");
            continue;
        };

        // Follows symlinks, so linked archives and directories are visible
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(name);
        } else if path.is_file() {
            files.push(name);
        }
    }

    (subdirs, files)
}

/// Nodes beneath one root matching a query
///
/// Created by [`find`].
pub struct Find {
    root: PathBuf,
    clean_parts: Vec<String>,
    escaped_fields: Vec<usize>,
    backends: Backends,
    walker: NamespaceWalker,
    pending: VecDeque<Node>,
}

/// Generate the nodes beneath `root` that match `pattern`
pub fn find(root: &Path, pattern: &str, backends: &Backends) -> Find {
    let clean_pattern = strip_escapes(pattern);
    let clean_parts: Vec<String> = clean_pattern.split('.').map(str::to_string).collect();

    Find {
        root: root.to_path_buf(),
        escaped_fields: escaped_pattern_fields(pattern),
        walker: NamespaceWalker::new(root, clean_parts.clone(), backends.supports_composite()),
        clean_parts,
        backends: backends.clone(),
        pending: VecDeque::new(),
    }
}

impl Find {
    /// Dot-joined metric path of `path` relative to the root
    ///
    /// Segments the query escaped are reported as written in the query.
    fn metric_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let joined = relative
            .iter()
            .map(|c| c.to_string_lossy())
            .collect::<Vec<_>>()
            .join(".");
        let mut parts: Vec<String> = joined.split('.').map(str::to_string).collect();

        for &index in &self.escaped_fields {
            if let (Some(slot), Some(query_part)) = (parts.get_mut(index), self.clean_parts.get(index)) {
                *slot = query_part.clone();
            }
        }

        Some(parts.join("."))
    }

    fn classify(&mut self, raw: RawMatch) {
        let (path, series_pattern) = match raw {
            RawMatch::Path(path) => (path, None),
            RawMatch::Composite {
                archive,
                series_pattern,
            } => (archive, Some(series_pattern)),
        };

        let Some(metric_path) = self.metric_path(&path) else {
            return;
        };

        if path.is_dir() {
            self.pending
                .push_back(Node::Directory(DirectoryNode::new(path, metric_path)));
            return;
        }
        if !path.is_file() {
            return;
        }

        let Some((stem, extension)) = metric_path.rsplit_once('.') else {
            return;
        };

        match extension {
            "wsp" => {
                let node = NativeFile::plain(path, stem, self.backends.native.clone());
                self.pending.push_back(Node::NativeFile(node));
            },
            "gz" if stem.ends_with(".wsp") => {
                let stem = &stem[..stem.len() - ".wsp".len()];
                let node = NativeFile::compressed(path, stem, self.backends.native.clone());
                self.pending.push_back(Node::CompressedNativeFile(node));
            },
            "rrd" => {
                let Some(archive) = CompositeArchive::from_backends(path, stem, &self.backends)
                else {
                    return;
                };
                self.classify_composite(archive, series_pattern);
            },
            _ => {},
        }
    }

    fn classify_composite(&mut self, archive: CompositeArchive, series_pattern: Option<String>) {
        let Some(series_pattern) = series_pattern else {
            self.pending.push_back(Node::CompositeArchive(archive));
            return;
        };

        match archive.data_sources() {
            Ok(sources) => {
                for source in sources {
                    if matches(source.name(), &series_pattern) {
                        self.pending.push_back(Node::CompositeArchiveSeries(source));
                    }
                }
            },
            Err(e) => {
                warn!(
                    archive = %archive.fs_path().display(),
                    error = %e,
                    "Failed to read composite archive data sources"
                );
            },
        }
    }
}

impl Iterator for Find {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        loop {
            if let Some(node) = self.pending.pop_front() {
                return Some(node);
            }
            let raw = self.walker.next()?;
            self.classify(raw);
        }
    }
}
