//! Write Batch API (§4.8): a scoped collector of mutations, committed
//! atomically under one sequence number.

use crate::codec::{alias_key, capture_key, encode_alias, encode_capture};
use cdxd_core::{Alias, Capture};
use serde::{Deserialize, Serialize};

/// One staged mutation against the collection's ordered keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Insert or overwrite the value at `key`.
    Put {
        /// Already-namespaced key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove `key`, if present.
    Delete {
        /// Already-namespaced key bytes.
        key: Vec<u8>,
    },
}

impl Mutation {
    fn approx_size(&self) -> usize {
        match self {
            Mutation::Put { key, value } => key.len() + value.len(),
            Mutation::Delete { key } => key.len(),
        }
    }
}

/// A scoped collection of mutations. Mutations accumulate in memory;
/// `commit` (via `Index::commit_batch`) installs them atomically under one
/// sequence number. Dropping a `Batch` without committing discards it —
/// there is nothing to clean up, since nothing has touched the store yet.
#[derive(Debug, Default)]
pub struct Batch {
    mutations: Vec<Mutation>,
    size_bytes: usize,
}

impl Batch {
    /// Start an empty batch.
    pub fn new() -> Self {
        Batch::default()
    }

    /// Stage an insert/overwrite of a raw, already-namespaced key.
    pub fn put_raw(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.size_bytes += key.len() + value.len();
        self.mutations.push(Mutation::Put { key, value });
    }

    /// Stage a deletion of a raw, already-namespaced key.
    pub fn delete_raw(&mut self, key: Vec<u8>) {
        self.size_bytes += key.len();
        self.mutations.push(Mutation::Delete { key });
    }

    /// Stage a capture upsert.
    pub fn put_capture(&mut self, capture: &Capture) {
        let (key, value) = encode_capture(capture);
        self.put_raw(key, value);
    }

    /// Stage a capture deletion by its primary key components.
    pub fn delete_capture(&mut self, urlkey: &str, timestamp: u64, filename: &str, offset: u64) {
        self.delete_raw(capture_key(urlkey, timestamp, filename, offset));
    }

    /// Stage an alias upsert.
    pub fn put_alias(&mut self, alias: &Alias) {
        let (key, value) = encode_alias(alias);
        self.put_raw(key, value);
    }

    /// Stage an alias deletion.
    pub fn delete_alias(&mut self, alias_surt: &str) {
        self.delete_raw(alias_key(alias_surt));
    }

    /// Current accumulated size of the batch, in bytes. Checked against
    /// `Limits::max_batch_bytes` before commit.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Number of staged mutations.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// True if no mutations have been staged.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Borrow the staged mutations, in staging order.
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Consume the batch, returning its mutations.
    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }
}

/// Recompute a batch's size from its mutations list (used after decoding a
/// replicated batch, where the size was never tracked incrementally).
pub fn mutations_size(mutations: &[Mutation]) -> usize {
    mutations.iter().map(Mutation::approx_size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_capture() -> Capture {
        Capture {
            urlkey: "com,example)/".into(),
            timestamp: 20200101000000,
            original_url: "http://example.com/".into(),
            mimetype: "text/html".into(),
            status: 200,
            digest: "abc".into(),
            redirecturl: "-".into(),
            robotflags: "-".into(),
            length: 10,
            offset: 0,
            filename: "a.warc".into(),
            original_length: None,
            original_offset: None,
            original_filename: None,
        }
    }

    #[test]
    fn empty_batch_has_no_mutations() {
        let batch = Batch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.size_bytes(), 0);
    }

    #[test]
    fn staging_tracks_size_and_count() {
        let mut batch = Batch::new();
        batch.put_capture(&sample_capture());
        batch.put_alias(&Alias {
            alias_surt: "com,example,www)/".into(),
            target_surt: "com,example)/".into(),
        });
        assert_eq!(batch.len(), 2);
        assert!(batch.size_bytes() > 0);
    }

    #[test]
    fn mutations_round_trip_through_serde() {
        let mut batch = Batch::new();
        batch.put_capture(&sample_capture());
        batch.delete_alias("com,example,www)/");
        let json = serde_json::to_vec(batch.mutations()).unwrap();
        let decoded: Vec<Mutation> = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded, batch.mutations());
    }
}
