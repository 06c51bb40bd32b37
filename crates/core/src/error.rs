//! Error types shared across the capture index server.
//!
//! Every subsystem (canonicalizer, codec, storage, query, access control)
//! defines its own leaf error type and converts it into this one `Error` at
//! the boundary where the distinction stops mattering to the caller. The
//! variants mirror the error kinds a capture index server exposes to its
//! clients: `BadRequest`, `NotFound`, `Forbidden`, `Conflict`,
//! `SequenceTruncated`, `UnknownRecordVersion`, `StorageError`, `Internal`.

use crate::limits::LimitsError;
use crate::surt::CanonicalizeError;
use thiserror::Error;

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the capture index server.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed parameter, invalid URL, or conflicting query parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unknown collection, rule, or policy.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write attempted on a read-only secondary, or an auth failure.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Rule or policy validation failed; carries every violation found.
    #[error("conflict: {0:?}")]
    Conflict(Vec<String>),

    /// `get_updates_since` was asked for a sequence no longer in the WAL.
    #[error("sequence {requested} has been truncated; oldest retained is {oldest}")]
    SequenceTruncated {
        /// The sequence number the caller asked for.
        requested: u64,
        /// The oldest sequence number still retained.
        oldest: u64,
    },

    /// The codec does not recognize a stored record's version byte.
    #[error("unknown record version: {0}")]
    UnknownRecordVersion(u8),

    /// Storage engine error, passed through with its message.
    #[error("storage error: {0}")]
    StorageError(String),

    /// A batch grew past the engine's size limit.
    #[error("batch too large: {size} bytes exceeds limit of {limit} bytes")]
    BatchTooLarge {
        /// The batch's accumulated size in bytes.
        size: usize,
        /// The configured limit.
        limit: usize,
    },

    /// A query ran longer than `Limits::query_timeout_ms`.
    #[error("query exceeded timeout of {limit_ms}ms")]
    QueryTimeout {
        /// The configured timeout, in milliseconds.
        limit_ms: u64,
    },

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CanonicalizeError> for Error {
    fn from(e: CanonicalizeError) -> Self {
        Error::BadRequest(e.to_string())
    }
}

impl From<LimitsError> for Error {
    fn from(e: LimitsError) -> Self {
        Error::Internal(e.to_string())
    }
}

impl Error {
    /// The error kind name used in logs and JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "BadRequest",
            Error::NotFound(_) => "NotFound",
            Error::Forbidden(_) => "Forbidden",
            Error::Conflict(_) => "Conflict",
            Error::SequenceTruncated { .. } => "SequenceTruncated",
            Error::UnknownRecordVersion(_) => "UnknownRecordVersion",
            Error::StorageError(_) => "StorageError",
            Error::BatchTooLarge { .. } => "BatchTooLarge",
            Error::QueryTimeout { .. } => "QueryTimeout",
            Error::Internal(_) => "Internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_error_taxonomy() {
        assert_eq!(Error::BadRequest("x".into()).kind(), "BadRequest");
        assert_eq!(
            Error::SequenceTruncated {
                requested: 1,
                oldest: 2
            }
            .kind(),
            "SequenceTruncated"
        );
        assert_eq!(Error::UnknownRecordVersion(9).kind(), "UnknownRecordVersion");
    }

    #[test]
    fn conflict_carries_all_violations() {
        let err = Error::Conflict(vec!["bad surt".into(), "inverted period".into()]);
        match err {
            Error::Conflict(v) => assert_eq!(v.len(), 2),
            _ => panic!("expected Conflict"),
        }
    }
}
