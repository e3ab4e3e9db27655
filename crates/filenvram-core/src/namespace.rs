//! Flat key encoding.
//!
//! A flat key is either global (`boot-args`) or namespaced
//! (`7C436110-AB2A-4BBB-A880-FE41995C9F82:boot-args`). The split happens at
//! the first separator; everything after it is the local key verbatim, so
//! local keys may contain the separator but namespaces may not.

use crate::error::NvramError;

/// Separator between namespace and local key.
pub const SEPARATOR: &str = ":";

/// Join a namespace and a local key into a flat key.
///
/// Total: the namespace is not validated. Use [`try_encode`] on runtime
/// paths where a caller-supplied namespace must not contain [`SEPARATOR`].
pub fn encode(namespace: Option<&str>, local: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}{SEPARATOR}{local}"),
        None => local.to_string(),
    }
}

/// Like [`encode`], but rejects namespaces that contain the separator
/// (they could not be decoded back to the same pair).
pub fn try_encode(namespace: Option<&str>, local: &str) -> Result<String, NvramError> {
    if let Some(ns) = namespace {
        validate_namespace(ns)?;
    }
    Ok(encode(namespace, local))
}

/// Split a flat key at the first separator.
pub fn decode(flat: &str) -> (Option<&str>, &str) {
    match flat.split_once(SEPARATOR) {
        Some((ns, local)) => (Some(ns), local),
        None => (None, flat),
    }
}

pub fn validate_namespace(namespace: &str) -> Result<(), NvramError> {
    if namespace.contains(SEPARATOR) {
        return Err(NvramError::InvalidNamespace(namespace.to_string()));
    }
    Ok(())
}

/// Append a path segment to an import prefix.
///
/// Imported platform trees can be deeper than two levels; their prefixes
/// are joined with the same separator and may therefore contain it.
pub(crate) fn join_segment(prefix: Option<&str>, segment: &str) -> String {
    encode(prefix, segment)
}
