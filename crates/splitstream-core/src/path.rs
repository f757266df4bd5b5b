//! Dimension Paths
//!
//! Dimension values become directory components on disk and object-key
//! segments in the store, so they are scrubbed before use: any byte outside
//! `[A-Za-z0-9_/.]` is replaced with `_`. Scrubbing is idempotent.
//!
//! Rotated files are named `<UTC stamp>_<host>` under their dimension path,
//! e.g. `Firefox/nightly/20140401153045.123_worker-3`.

use chrono::{DateTime, Utc};

/// Replace every byte not in `[A-Za-z0-9_/.]` with `_`.
pub fn sanitize_dimension(dim: &str) -> String {
    let cleaned: Vec<u8> = dim
        .bytes()
        .map(|b| match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'/' | b'.' => b,
            _ => b'_',
        })
        .collect();
    // The allowed set is pure ASCII and every other byte maps to '_'.
    String::from_utf8_lossy(&cleaned).into_owned()
}

/// Sanitize each dimension value and join them into a relative path.
pub fn dimension_path(dims: &[String]) -> String {
    dims.iter()
        .map(|d| sanitize_dimension(d))
        .collect::<Vec<_>>()
        .join("/")
}

/// Strip excess path separators from a bucket prefix.
pub fn clean_bucket_prefix(prefix: &str) -> String {
    prefix.trim_matches('/').to_string()
}

/// File name for a freshly rotated file: UTC timestamp with millisecond
/// precision plus the host tag.
pub fn new_file_name(now: DateTime<Utc>, host: &str) -> String {
    format!("{}_{}", now.format("%Y%m%d%H%M%S%.3f"), host)
}

/// The local host name, sanitized for use in file names.
pub fn host_tag() -> String {
    match hostname::get() {
        Ok(name) => sanitize_dimension(&name.to_string_lossy()),
        Err(_) => "localhost".to_string(),
    }
}
