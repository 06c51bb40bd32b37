//! Shared types, error taxonomy, and SURT canonicalization for the capture
//! index server.
//!
//! This crate has no knowledge of storage engines or HTTP: it defines the
//! data model (`Capture`, `Alias`, time windows), the URL keying scheme, and
//! the error taxonomy every other crate in the workspace converts into.

#![warn(missing_docs)]

pub mod error;
pub mod keyspace;
pub mod limits;
pub mod surt;
pub mod types;

pub use error::{Error, Result};
pub use limits::{Limits, LimitsError};
pub use surt::{canonicalize, canonicalize_request, host_prefix, CanonicalizeConfig, CanonicalizeError};
pub use types::{Alias, Capture, SequenceNumber, TimeWindow, Timestamp, MAX_TIMESTAMP};
