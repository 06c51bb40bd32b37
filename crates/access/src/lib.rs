//! Access control (§4.5): SURT-prefix rules resolving to named policies,
//! stored alongside captures and aliases in the same collection keyspace.

#![warn(missing_docs)]

pub mod codec;
pub mod decision;
pub mod types;

pub use decision::{AccessControl, Decision};
pub use types::{AccessPolicy, AccessRule};
