//! Error types for the NVRAM store.

use thiserror::Error;

use crate::document::DocumentError;

/// Errors surfaced by store operations.
///
/// Persistence failures (`Io`, `Parse`) never reach the caller of a
/// mutation: the sync engine logs them and the in-memory store stays
/// authoritative. They are returned only by operations that read or write
/// a file on the caller's behalf (config loading, explicit export).
#[derive(Error, Debug)]
pub enum NvramError {
    #[error("Permission denied for key: {key}")]
    PermissionDenied { key: String },

    #[error("Malformed value for control key {key}: expected {expected}")]
    MalformedControlValue { key: String, expected: &'static str },

    #[error("Namespace must not contain the separator: {0}")]
    InvalidNamespace(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] DocumentError),
}

impl NvramError {
    pub(crate) fn denied(key: &str) -> Self {
        NvramError::PermissionDenied {
            key: key.to_string(),
        }
    }

    pub(crate) fn malformed(key: &str, expected: &'static str) -> Self {
        NvramError::MalformedControlValue {
            key: key.to_string(),
            expected,
        }
    }
}
