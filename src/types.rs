//! Core data types shared by local and remote nodes
//!
//! # Key Types
//!
//! - **`TimeInfo`**: time axis of a fetched series (start, end, step in seconds)
//! - **`SeriesData`**: a local fetch result, one value slot per step
//! - **`RemoteSeries`**: one named series returned by a cluster peer
//! - **`FetchResult`**: the uniform result of `Node::fetch`
//! - **`Interval`**: a `[start, end)` window of available data
//!
//! # Example
//!
//! ```rust
//! use kuba_finder::types::{Interval, TimeInfo};
//!
//! let info = TimeInfo::new(1000, 1060, 10);
//! assert_eq!(info.points(), 6);
//!
//! // An mtime older than the retention start is clamped
//! let interval = Interval::clamped(500.0, 400.0);
//! assert_eq!(interval.end, 500.0);
//! ```

use serde::{Deserialize, Serialize};

/// Time axis descriptor, all values in unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInfo {
    /// First timestamp (inclusive)
    pub start: i64,
    /// Last timestamp (exclusive)
    pub end: i64,
    /// Seconds between consecutive values
    pub step: i64,
}

impl TimeInfo {
    /// Create a new time axis
    pub fn new(start: i64, end: i64, step: i64) -> Self {
        Self { start, end, step }
    }

    /// Number of value slots on this axis
    pub fn points(&self) -> usize {
        if self.step <= 0 || self.end <= self.start {
            return 0;
        }
        ((self.end - self.start) / self.step) as usize
    }
}

/// Series read from a local archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesData {
    /// Time axis of `values`
    pub time_info: TimeInfo,
    /// One slot per step, `None` where no data was recorded
    pub values: Vec<Option<f64>>,
}

/// Series returned by a remote peer's fetch endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSeries {
    /// Metric path of the series
    pub name: String,
    /// Target expression the series was produced for
    #[serde(rename = "pathExpression", default)]
    pub path_expression: Option<String>,
    /// First timestamp
    pub start: i64,
    /// Last timestamp
    pub end: i64,
    /// Seconds between consecutive values
    pub step: i64,
    /// One slot per step
    pub values: Vec<Option<f64>>,
}

impl RemoteSeries {
    /// Time axis of this series
    pub fn time_info(&self) -> TimeInfo {
        TimeInfo::new(self.start, self.end, self.step)
    }
}

/// Result of fetching any node
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FetchResult {
    /// Branches, remote branches, and archives with no data in range
    #[default]
    Empty,
    /// Local series
    Series(SeriesData),
    /// Series materialized by a remote peer
    Remote(Vec<RemoteSeries>),
}

impl FetchResult {
    /// True when nothing was fetched
    pub fn is_empty(&self) -> bool {
        match self {
            FetchResult::Empty => true,
            FetchResult::Series(_) => false,
            FetchResult::Remote(series) => series.is_empty(),
        }
    }
}

/// A `[start, end)` window of available data, in unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Window start
    pub start: f64,
    /// Window end, never less than `start`
    pub end: f64,
}

impl Interval {
    /// Build an interval whose end is clamped to be at least `start`
    ///
    /// Clock or mtime skew can report a last-modified time older than the
    /// retention start.
    pub fn clamped(start: f64, end: f64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Window length in seconds
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Current unix time in fractional seconds
pub(crate) fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
