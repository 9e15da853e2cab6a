//! Key syntax and path helpers.
//!
//! Keys are absolute `/`-delimited paths such as
//! `/telephony/contexts/op1/apn`. A key may name a leaf setting or a
//! directory containing other keys.

use crate::error::{ProvError, ProvResult};

/// Validates key syntax.
///
/// A valid key is non-empty, starts with `/` and never contains two
/// adjacent `/` characters.
pub fn validate_key(key: &str) -> ProvResult<()> {
    if !key.starts_with('/') {
        return Err(ProvError::BadArgs(format!("key must be absolute: {key:?}")));
    }
    if key.contains("//") {
        return Err(ProvError::BadArgs(format!("empty path segment in {key:?}")));
    }
    Ok(())
}

/// Returns true if `key` equals `prefix` or lies beneath it.
///
/// The match must end on a path boundary, so `/applications` covers
/// `/applications/x` but not `/applicationsFoo/x`. A prefix ending in `/`
/// is already a boundary.
pub fn is_under(key: &str, prefix: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// Joins a directory key and a relative segment with exactly one `/`.
pub fn join_key(dir: &str, segment: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let segment = segment.trim_start_matches('/');
    format!("{dir}/{segment}")
}
