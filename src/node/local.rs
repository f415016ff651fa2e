//! Directory and native archive nodes

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use crate::error::Result;
use crate::storage::backend::{
    open_compressed, ArchiveInfo, NativeArchiveBackend, COMPRESSED_EXTENSION, NATIVE_EXTENSION,
};
use crate::storage::context::{Context, ContextStore};
use crate::types::{unix_now, FetchResult, Interval};

/// Last dot-delimited segment of a metric path
pub(crate) fn last_segment(metric_path: &str) -> &str {
    metric_path.rsplit('.').next().unwrap_or(metric_path)
}

/// Last-modified time of `path` in unix seconds
pub(crate) fn modified_secs(path: &Path) -> Result<f64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0))
}

/// A directory in a local root
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    fs_path: PathBuf,
    metric_path: String,
    name: String,
}

impl DirectoryNode {
    /// Create a directory node
    pub fn new(fs_path: PathBuf, metric_path: impl Into<String>) -> Self {
        let metric_path = metric_path.into();
        Self {
            fs_path,
            name: last_segment(&metric_path).to_string(),
            metric_path,
        }
    }

    /// Physical directory
    pub fn fs_path(&self) -> &Path {
        &self.fs_path
    }

    /// Metric path of the directory
    pub fn metric_path(&self) -> &str {
        &self.metric_path
    }

    /// Last segment of the metric path
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A native archive, plain or gzip-compressed
#[derive(Clone)]
pub struct NativeFile {
    fs_path: PathBuf,
    metric_path: String,
    real_metric: String,
    name: String,
    compressed: bool,
    backend: Arc<dyn NativeArchiveBackend>,
    context: Arc<ContextStore>,
}

impl NativeFile {
    /// A plain `.wsp` archive
    pub fn plain(
        fs_path: PathBuf,
        metric_path: impl Into<String>,
        backend: Arc<dyn NativeArchiveBackend>,
    ) -> Self {
        Self::build(fs_path, metric_path.into(), backend, false)
    }

    /// A `.wsp.gz` archive
    pub fn compressed(
        fs_path: PathBuf,
        metric_path: impl Into<String>,
        backend: Arc<dyn NativeArchiveBackend>,
    ) -> Self {
        Self::build(fs_path, metric_path.into(), backend, true)
    }

    fn build(
        fs_path: PathBuf,
        metric_path: String,
        backend: Arc<dyn NativeArchiveBackend>,
        compressed: bool,
    ) -> Self {
        let extension = if compressed {
            COMPRESSED_EXTENSION
        } else {
            NATIVE_EXTENSION
        };

        Self {
            real_metric: resolve_real_metric(&fs_path, &metric_path, extension),
            name: last_segment(&metric_path).to_string(),
            context: Arc::new(ContextStore::for_archive(&fs_path, extension)),
            fs_path,
            metric_path,
            compressed,
            backend,
        }
    }

    /// Physical archive file
    pub fn fs_path(&self) -> &Path {
        &self.fs_path
    }

    /// Metric path of the archive
    pub fn metric_path(&self) -> &str {
        &self.metric_path
    }

    /// Metric path after resolving symlinks, for diagnostics
    pub fn real_metric(&self) -> &str {
        &self.real_metric
    }

    /// Last segment of the metric path
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True for `.wsp.gz` archives
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Archive extension
    pub fn extension(&self) -> &'static str {
        if self.compressed {
            COMPRESSED_EXTENSION
        } else {
            NATIVE_EXTENSION
        }
    }

    /// Archive header
    pub fn info(&self) -> Result<ArchiveInfo> {
        if self.compressed {
            let mut reader = open_compressed(&self.fs_path)?;
            self.backend.file_info(&mut reader)
        } else {
            self.backend.info(&self.fs_path)
        }
    }

    /// Fetch `[start, end)` from the archive
    pub fn fetch(&self, start: i64, end: i64, now: Option<i64>) -> Result<FetchResult> {
        let series = if self.compressed {
            let mut reader = open_compressed(&self.fs_path)?;
            self.backend.file_fetch(&mut reader, start, end, now)?
        } else {
            self.backend.fetch(&self.fs_path, start, end, now)?
        };

        Ok(series.map_or(FetchResult::Empty, FetchResult::Series))
    }

    /// Window from the retention start to the archive's last update
    pub fn intervals(&self) -> Result<Vec<Interval>> {
        let info = self.info()?;
        let start = unix_now() - info.max_retention as f64;
        let end = modified_secs(&self.fs_path)?;
        Ok(vec![Interval::clamped(start, end)])
    }

    /// Sidecar context, loaded on first access
    pub fn context(&self) -> Result<Context> {
        self.context.get()
    }

    /// Merge `patch` into the context and rewrite the sidecar
    pub fn update_context(&self, patch: Context) -> Result<()> {
        self.context.update(patch)
    }
}

/// Re-derive the metric path from the canonical location of `fs_path`
///
/// Falls back to `metric_path` when the file is not behind a symlink or the
/// paths cannot be resolved.
fn resolve_real_metric(fs_path: &Path, metric_path: &str, extension: &str) -> String {
    let Ok(real_fs_path) = fs_path.canonicalize() else {
        return metric_path.to_string();
    };
    if real_fs_path == fs_path {
        return metric_path.to_string();
    }

    let relative_fs_path = format!("{}{}", metric_path.replace('.', "/"), extension);
    let fs_str = fs_path.to_string_lossy();
    let Some(base) = fs_str.strip_suffix(relative_fs_path.as_str()) else {
        return metric_path.to_string();
    };
    let Ok(real_base) = Path::new(base).canonicalize() else {
        return metric_path.to_string();
    };
    let Ok(relative_real) = real_fs_path.strip_prefix(&real_base) else {
        return metric_path.to_string();
    };

    let relative_real = relative_real.to_string_lossy();
    relative_real
        .strip_suffix(extension)
        .unwrap_or(&relative_real)
        .replace('/', ".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::{SeriesData, TimeInfo};
    use std::io::Read;
    use tempfile::TempDir;

    /// Backend with a fixed retention that echoes the request into the axis
    struct FixedBackend {
        retention: u64,
    }

    impl NativeArchiveBackend for FixedBackend {
        fn info(&self, _path: &Path) -> Result<ArchiveInfo> {
            Ok(ArchiveInfo {
                max_retention: self.retention,
            })
        }

        fn fetch(&self, _: &Path, from: i64, until: i64, _: Option<i64>) -> Result<Option<SeriesData>> {
            Ok(Some(SeriesData {
                time_info: TimeInfo::new(from, until, 60),
                values: vec![Some(1.0); TimeInfo::new(from, until, 60).points()],
            }))
        }

        fn file_info(&self, reader: &mut dyn Read) -> Result<ArchiveInfo> {
            let mut header = String::new();
            reader.read_to_string(&mut header)?;
            let max_retention = header
                .trim()
                .parse()
                .map_err(|_| Error::Backend("bad header".into()))?;
            Ok(ArchiveInfo { max_retention })
        }

        fn file_fetch(&self, _: &mut dyn Read, _: i64, _: i64, _: Option<i64>) -> Result<Option<SeriesData>> {
            Ok(None)
        }
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("a.b.c"), "c");
        assert_eq!(last_segment("single"), "single");
    }

    #[test]
    fn test_native_intervals_clamped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cpu.wsp");
        std::fs::write(&path, b"").unwrap();

        // Zero retention puts the start at "now", after the file's mtime
        let node = NativeFile::plain(path, "cpu", Arc::new(FixedBackend { retention: 0 }));
        let intervals = node.intervals().unwrap();
        assert_eq!(intervals.len(), 1);
        assert!(intervals[0].end >= intervals[0].start);
    }

    #[test]
    fn test_native_intervals_span_retention() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cpu.wsp");
        std::fs::write(&path, b"").unwrap();

        let node = NativeFile::plain(path, "cpu", Arc::new(FixedBackend { retention: 86_400 }));
        let interval = node.intervals().unwrap()[0];
        assert!(interval.duration() > 86_000.0);
        assert!(interval.duration() <= 86_400.0 + 5.0);
    }

    #[test]
    fn test_native_fetch_delegates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cpu.wsp");
        std::fs::write(&path, b"").unwrap();

        let node = NativeFile::plain(path, "a.cpu", Arc::new(FixedBackend { retention: 60 }));
        match node.fetch(0, 600, None).unwrap() {
            FetchResult::Series(data) => assert_eq!(data.values.len(), 10),
            other => panic!("unexpected fetch result: {:?}", other),
        }
    }

    #[test]
    fn test_real_metric_follows_symlink() {
        #[cfg(unix)]
        {
            let dir = TempDir::new().unwrap();
            let root = dir.path();
            std::fs::create_dir_all(root.join("real/host")).unwrap();
            std::fs::write(root.join("real/host/cpu.wsp"), b"").unwrap();
            std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();

            let node = NativeFile::plain(
                root.join("alias/host/cpu.wsp"),
                "alias.host.cpu",
                Arc::new(FixedBackend { retention: 60 }),
            );
            assert_eq!(node.metric_path(), "alias.host.cpu");
            assert_eq!(node.real_metric(), "real.host.cpu");
        }
    }

    #[test]
    fn test_contexts_are_not_shared() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn NativeArchiveBackend> = Arc::new(FixedBackend { retention: 60 });
        let a = NativeFile::plain(dir.path().join("a.wsp"), "a", backend.clone());
        let b = NativeFile::plain(dir.path().join("b.wsp"), "b", backend);

        a.update_context(Context::from([("k".to_string(), serde_json::json!(1))]))
            .unwrap();
        assert_eq!(a.context().unwrap().len(), 1);
        assert!(b.context().unwrap().is_empty());
    }
}
