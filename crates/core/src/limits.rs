//! Recognized configuration and size limits.
//!
//! A single struct validated once at construction rather than checked ad
//! hoc at each call site.

use thiserror::Error;

/// Default maximum size, in bytes, of one write batch before it is rejected
/// with `BatchTooLarge`.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 64 * 1024 * 1024;

/// Default cumulative base64 size, in bytes, at which a change-feed response
/// stops accumulating records.
pub const DEFAULT_CHANGE_FEED_SIZE: usize = 10 * 1024 * 1024;

/// Default cap on the number of collection handles the `DataStore` keeps
/// resident at once.
pub const DEFAULT_MAX_OPEN_COLLECTIONS: usize = 256;

/// Size and resource limits enforced by the storage and query layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of one write batch, in bytes.
    pub max_batch_bytes: usize,
    /// Maximum cumulative base64 size of one change-feed response.
    pub change_feed_size: usize,
    /// Maximum number of results a single query may return.
    pub max_num_results: usize,
    /// Maximum number of collection handles kept resident at once.
    pub max_open_collections: usize,
    /// Wall-clock budget for one query, in milliseconds. `None` disables the
    /// timeout.
    pub query_timeout_ms: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            change_feed_size: DEFAULT_CHANGE_FEED_SIZE,
            max_num_results: 10_000,
            max_open_collections: DEFAULT_MAX_OPEN_COLLECTIONS,
            query_timeout_ms: Some(30_000),
        }
    }
}

/// Errors raised while validating a `Limits` value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimitsError {
    /// A size-like field was set to zero.
    #[error("{field} must be greater than zero")]
    Zero {
        /// Name of the offending field.
        field: &'static str,
    },
}

impl Limits {
    /// Validate that every limit is usable. Zero limits would make every
    /// write or query fail immediately, which is almost certainly a
    /// misconfiguration rather than an intentional policy.
    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.max_batch_bytes == 0 {
            return Err(LimitsError::Zero {
                field: "max_batch_bytes",
            });
        }
        if self.change_feed_size == 0 {
            return Err(LimitsError::Zero {
                field: "change_feed_size",
            });
        }
        if self.max_num_results == 0 {
            return Err(LimitsError::Zero {
                field: "max_num_results",
            });
        }
        if self.max_open_collections == 0 {
            return Err(LimitsError::Zero {
                field: "max_open_collections",
            });
        }
        if self.query_timeout_ms == Some(0) {
            return Err(LimitsError::Zero {
                field: "query_timeout_ms",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_validate() {
        assert!(Limits::default().validate().is_ok());
    }

    #[test]
    fn zero_batch_bytes_rejected() {
        let limits = Limits {
            max_batch_bytes: 0,
            ..Limits::default()
        };
        assert_eq!(
            limits.validate(),
            Err(LimitsError::Zero {
                field: "max_batch_bytes"
            })
        );
    }

    #[test]
    fn zero_open_collections_rejected() {
        let limits = Limits {
            max_open_collections: 0,
            ..Limits::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn zero_query_timeout_rejected() {
        let limits = Limits {
            query_timeout_ms: Some(0),
            ..Limits::default()
        };
        assert_eq!(
            limits.validate(),
            Err(LimitsError::Zero {
                field: "query_timeout_ms"
            })
        );
    }

    #[test]
    fn disabled_query_timeout_validates() {
        let limits = Limits {
            query_timeout_ms: None,
            ..Limits::default()
        };
        assert!(limits.validate().is_ok());
    }
}
