//! Header forwarding for peer requests

use reqwest::header::{HeaderMap, HeaderName};

/// Copy the configured `names` from an incoming request's headers
///
/// Names are matched case-insensitively; names that are not valid header
/// names are ignored.
pub fn extract_forward_headers(incoming: &HeaderMap, names: &[String]) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for name in names {
        let Ok(name) = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()) else {
            continue;
        };
        for value in incoming.get_all(&name) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}
