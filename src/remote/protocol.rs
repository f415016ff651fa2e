//! Peer-to-peer wire protocol
//!
//! Two endpoints, both accepting GET query strings or POST form bodies:
//!
//! - `/metrics/find/` with `local=1, format=json, query=<pattern>`, answered
//!   with a JSON list of `{"metric_path": str, "isLeaf": bool}`
//! - `/render/` with `local=1, format=json, from, until, target...` and an
//!   optional `now`, answered with a JSON list of series objects
//!
//! `local=1` asks the peer to answer from its own roots only, so a query never
//! travels more than one hop.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::RemoteSeries;

/// Find endpoint path
pub const FIND_PATH: &str = "/metrics/find/";

/// Fetch endpoint path
pub const RENDER_PATH: &str = "/render/";

/// Serialization requested from peers
pub const FORMAT: &str = "json";

const CRC64: crc::Crc<u64> = crc::Crc::<u64>::new(&crc::CRC_64_ECMA_182);

/// One node reported by a peer's find endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindRecord {
    /// Metric path of the node
    pub metric_path: String,
    /// Whether the peer considers the node fetchable
    #[serde(rename = "isLeaf")]
    pub is_leaf: bool,
}

impl FindRecord {
    /// Create a record
    pub fn new(metric_path: impl Into<String>, is_leaf: bool) -> Self {
        Self {
            metric_path: metric_path.into(),
            is_leaf,
        }
    }
}

/// Ordered request parameters; `target` may repeat
pub type QueryParams = Vec<(&'static str, String)>;

/// Parameters of a find request
pub fn find_params(query: &str) -> QueryParams {
    vec![
        ("local", "1".to_string()),
        ("format", FORMAT.to_string()),
        ("query", query.to_string()),
    ]
}

/// Parameters of a fetch request for one or many targets
pub fn fetch_params(targets: &[String], from: i64, until: i64, now: Option<i64>) -> QueryParams {
    let mut params = vec![
        ("local", "1".to_string()),
        ("format", FORMAT.to_string()),
        ("from", from.to_string()),
        ("until", until.to_string()),
    ];
    params.extend(targets.iter().map(|t| ("target", t.clone())));
    if let Some(now) = now {
        params.push(("now", now.to_string()));
    }
    params
}

/// Decode a find response body
pub fn decode_find(host: &str, body: &[u8]) -> Result<Vec<FindRecord>> {
    serde_json::from_slice(body)
        .map_err(|e| Error::protocol(host, format!("invalid find response: {}", e)))
}

/// Decode and validate a fetch response body
pub fn decode_fetch(host: &str, body: &[u8]) -> Result<Vec<RemoteSeries>> {
    let series: Vec<RemoteSeries> = serde_json::from_slice(body)
        .map_err(|e| Error::protocol(host, format!("invalid fetch response: {}", e)))?;

    if let Some(bad) = series.iter().find(|s| s.step <= 0) {
        return Err(Error::protocol(
            host,
            format!("series {} has non-positive step {}", bad.name, bad.step),
        ));
    }

    Ok(series)
}

/// Cache key of a find for `query` against `host`
pub fn cache_key(host: &str, query: &str) -> String {
    let key = format!("find:{}:{}", host, query);
    format!("{:016x}", CRC64.checksum(key.as_bytes()))
}
