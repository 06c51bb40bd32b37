//! Storage engine for the capture index server: the record codec, the
//! write-ahead log, the write batch API, the per-collection ordered index,
//! the change feed, and the multi-collection data store (§4.2, §4.3, §4.6,
//! §4.7, §4.8).
//!
//! This crate knows nothing about URL canonicalization, query planning, or
//! access control — it is a durable, ordered key-value engine namespaced
//! for the record kinds `cdxd-core::keyspace` defines, plus the replication
//! plumbing built on top of it.

#![warn(missing_docs)]

pub mod batch;
pub mod changefeed;
pub mod codec;
pub mod datastore;
pub mod index;
pub mod wal;

pub use batch::{Batch, Mutation};
pub use changefeed::{apply_entry, get_updates_since, ChangeCursor, ChangeFeedEntry};
pub use codec::{capture_key, capture_urlkey_prefix_bytes, prefix_successor};
pub use datastore::DataStore;
pub use index::{AliasCursor, CaptureCursor, Index};
pub use wal::DurabilityMode;
