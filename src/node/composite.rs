//! Composite archive nodes
//!
//! A composite archive is one file holding several named data sources. The
//! file itself is a branch; each data source is a leaf whose metric path is the
//! archive's path plus the source name.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::local::{last_segment, modified_secs};
use crate::error::{Error, Result};
use crate::storage::backend::{Backends, CompositeArchiveBackend, CompositeInfo};
use crate::types::{unix_now, FetchResult, Interval, SeriesData};

/// A composite archive file
#[derive(Clone)]
pub struct CompositeArchive {
    fs_path: PathBuf,
    metric_path: String,
    name: String,
    backend: Arc<dyn CompositeArchiveBackend>,
    cf: String,
    flush_cached_daemon: Option<String>,
}

impl CompositeArchive {
    /// Create a composite archive node
    pub fn new(
        fs_path: PathBuf,
        metric_path: impl Into<String>,
        backend: Arc<dyn CompositeArchiveBackend>,
        cf: impl Into<String>,
        flush_cached_daemon: Option<String>,
    ) -> Self {
        let metric_path = metric_path.into();
        Self {
            fs_path,
            name: last_segment(&metric_path).to_string(),
            metric_path,
            backend,
            cf: cf.into(),
            flush_cached_daemon,
        }
    }

    /// Build from the configured backends, `None` without composite support
    pub fn from_backends(
        fs_path: PathBuf,
        metric_path: impl Into<String>,
        backends: &Backends,
    ) -> Option<Self> {
        let backend = backends.composite.clone()?;
        Some(Self::new(
            fs_path,
            metric_path,
            backend,
            backends.composite_cf.clone(),
            backends.flush_cached_daemon.clone(),
        ))
    }

    /// Physical archive file
    pub fn fs_path(&self) -> &Path {
        &self.fs_path
    }

    /// Metric path of the archive
    pub fn metric_path(&self) -> &str {
        &self.metric_path
    }

    /// Last segment of the metric path
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Archive header
    pub fn info(&self) -> Result<CompositeInfo> {
        self.backend.info(&self.fs_path)
    }

    /// One leaf per data source
    pub fn data_sources(&self) -> Result<Vec<CompositeArchiveSeries>> {
        Ok(self
            .info()?
            .data_sources
            .into_iter()
            .map(|source| CompositeArchiveSeries::new(self.clone(), &source))
            .collect())
    }

    /// Longest retention of the archive, in seconds
    pub fn retention(&self) -> Result<u64> {
        Ok(self.info()?.retention())
    }
}

/// One data source inside a composite archive
#[derive(Clone)]
pub struct CompositeArchiveSeries {
    archive: CompositeArchive,
    metric_path: String,
    name: String,
}

impl CompositeArchiveSeries {
    /// Data source `source` of `archive`
    pub fn new(archive: CompositeArchive, source: &str) -> Self {
        let metric_path = format!("{}.{}", archive.metric_path, source);
        Self {
            name: last_segment(&metric_path).to_string(),
            metric_path,
            archive,
        }
    }

    /// Archive holding this series
    pub fn archive(&self) -> &CompositeArchive {
        &self.archive
    }

    /// Physical archive file
    pub fn fs_path(&self) -> &Path {
        &self.archive.fs_path
    }

    /// Metric path of the series
    pub fn metric_path(&self) -> &str {
        &self.metric_path
    }

    /// Data source name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch `[start, end)` for this data source
    ///
    /// The newest row of a live composite archive may be partially written, so
    /// the last row is always dropped. Resolution is chosen by the backend; a
    /// `now` override has no effect here.
    pub fn fetch(&self, start: i64, end: i64) -> Result<FetchResult> {
        let archive = &self.archive;
        if let Some(daemon) = &archive.flush_cached_daemon {
            archive.backend.flush_cached(&archive.fs_path, daemon)?;
        }

        let fetched = archive
            .backend
            .fetch(&archive.fs_path, &archive.cf, start, end)?;
        let column = fetched
            .columns
            .iter()
            .position(|c| c == &self.name)
            .ok_or_else(|| {
                Error::Backend(format!(
                    "data source {} missing from {}",
                    self.name,
                    archive.fs_path.display()
                ))
            })?;

        let mut rows = fetched.rows;
        rows.pop();
        let values = rows
            .iter()
            .map(|row| row.get(column).copied().flatten())
            .collect();

        Ok(FetchResult::Series(SeriesData {
            time_info: fetched.time_info,
            values,
        }))
    }

    /// Window from the archive's retention start to its last update
    pub fn intervals(&self) -> Result<Vec<Interval>> {
        let start = unix_now() - self.archive.retention()? as f64;
        let end = modified_secs(&self.archive.fs_path)?;
        Ok(vec![Interval::clamped(start, end)])
    }
}
