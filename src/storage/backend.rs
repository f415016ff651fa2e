//! Archive backend interfaces
//!
//! The on-disk time-series formats are opaque to the finder. Native archives
//! (fixed-step, fixed-size files) and composite archives (several named data
//! sources per file) are reached through the traits below; a deployment plugs
//! in concrete readers when it builds [`Backends`].

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use crate::config::FederationConfig;
use crate::error::{Error, Result};
use crate::types::{SeriesData, TimeInfo};

/// File extension of native archives
pub const NATIVE_EXTENSION: &str = ".wsp";

/// File extension of gzip-compressed native archives
pub const COMPRESSED_EXTENSION: &str = ".wsp.gz";

/// File extension of composite archives
pub const COMPOSITE_EXTENSION: &str = ".rrd";

/// Header information of a native archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveInfo {
    /// Longest retention across the archive's resolutions, in seconds
    pub max_retention: u64,
}

/// Reader for native archives
pub trait NativeArchiveBackend: Send + Sync {
    /// Read the header of the archive at `path`
    fn info(&self, path: &Path) -> Result<ArchiveInfo>;

    /// Fetch `[from, until)` from the archive at `path`
    ///
    /// `now` overrides the wall clock used to pick the archive resolution.
    /// Returns `None` when the range holds no data.
    fn fetch(
        &self,
        path: &Path,
        from: i64,
        until: i64,
        now: Option<i64>,
    ) -> Result<Option<SeriesData>>;

    /// Read the header from an already-open stream
    fn file_info(&self, reader: &mut dyn Read) -> Result<ArchiveInfo>;

    /// Fetch from an already-open stream
    fn file_fetch(
        &self,
        reader: &mut dyn Read,
        from: i64,
        until: i64,
        now: Option<i64>,
    ) -> Result<Option<SeriesData>>;
}

/// One round-robin archive inside a composite archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRobinArchive {
    /// Primary data points consolidated per row
    pub pdp_per_row: u64,
    /// Rows kept
    pub rows: u64,
}

/// Header information of a composite archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeInfo {
    /// Seconds per primary data point
    pub step: u64,
    /// Names of the data sources stored in the file
    pub data_sources: Vec<String>,
    /// Round-robin archives
    pub archives: Vec<RoundRobinArchive>,
}

impl CompositeInfo {
    /// Longest retention across all round-robin archives, in seconds
    pub fn retention(&self) -> u64 {
        let points = self
            .archives
            .iter()
            .map(|rra| rra.pdp_per_row.saturating_mul(rra.rows))
            .max()
            .unwrap_or(0);
        points.saturating_mul(self.step)
    }
}

/// Rows fetched from a composite archive
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeFetch {
    /// Time axis of `rows`
    pub time_info: TimeInfo,
    /// Data source name of each column
    pub columns: Vec<String>,
    /// One row per step, one cell per column
    pub rows: Vec<Vec<Option<f64>>>,
}

/// Reader for composite archives
pub trait CompositeArchiveBackend: Send + Sync {
    /// Read the header of the archive at `path`
    fn info(&self, path: &Path) -> Result<CompositeInfo>;

    /// Fetch all columns over `[from, until)` consolidated with `cf`
    fn fetch(&self, path: &Path, cf: &str, from: i64, until: i64) -> Result<CompositeFetch>;

    /// Ask the caching daemon at `daemon` to flush pending updates for `path`
    fn flush_cached(&self, path: &Path, daemon: &str) -> Result<()>;
}

/// Native backend used when none is configured
///
/// Every call fails, so local leaves are still found but cannot be read.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableBackend;

impl UnavailableBackend {
    fn error() -> Error {
        Error::Backend("no native archive backend configured".to_string())
    }
}

impl NativeArchiveBackend for UnavailableBackend {
    fn info(&self, _path: &Path) -> Result<ArchiveInfo> {
        Err(Self::error())
    }

    fn fetch(&self, _: &Path, _: i64, _: i64, _: Option<i64>) -> Result<Option<SeriesData>> {
        Err(Self::error())
    }

    fn file_info(&self, _reader: &mut dyn Read) -> Result<ArchiveInfo> {
        Err(Self::error())
    }

    fn file_fetch(
        &self,
        _: &mut dyn Read,
        _: i64,
        _: i64,
        _: Option<i64>,
    ) -> Result<Option<SeriesData>> {
        Err(Self::error())
    }
}

/// The archive readers available to local nodes
#[derive(Clone)]
pub struct Backends {
    /// Native archive reader
    pub native: Arc<dyn NativeArchiveBackend>,
    /// Composite archive reader, `None` when composite archives are unsupported
    pub composite: Option<Arc<dyn CompositeArchiveBackend>>,
    /// Consolidation function for composite fetches
    pub composite_cf: String,
    /// Caching daemon flushed before composite fetches
    pub flush_cached_daemon: Option<String>,
}

impl Backends {
    /// Backends with only native archive support
    pub fn new(native: Arc<dyn NativeArchiveBackend>) -> Self {
        Self {
            native,
            composite: None,
            composite_cf: "AVERAGE".to_string(),
            flush_cached_daemon: None,
        }
    }

    /// Enable composite archive support
    pub fn with_composite(mut self, composite: Arc<dyn CompositeArchiveBackend>) -> Self {
        self.composite = Some(composite);
        self
    }

    /// Apply the composite settings from `config`
    pub fn configured(mut self, config: &FederationConfig) -> Self {
        self.composite_cf = config.composite_cf.clone();
        self.flush_cached_daemon = config.flush_cached_daemon.clone();
        self
    }

    /// True when composite archives are searched and classified
    pub fn supports_composite(&self) -> bool {
        self.composite.is_some()
    }
}

impl Default for Backends {
    fn default() -> Self {
        Self::new(Arc::new(UnavailableBackend))
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("composite", &self.supports_composite())
            .field("composite_cf", &self.composite_cf)
            .field("flush_cached_daemon", &self.flush_cached_daemon)
            .finish()
    }
}

/// Open a compressed native archive as a decompressed stream
pub fn open_compressed(path: &Path) -> Result<impl Read> {
    let file = File::open(path)?;
    Ok(GzDecoder::new(BufReader::new(file)))
}
