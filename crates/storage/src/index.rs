//! Index (§4.3): the ordered key-value wrapper one collection is built on.
//!
//! Combines an in-memory ordered map (the source of truth for reads) with a
//! write-ahead log (the source of truth for recovery and replication).
//! Every mutating operation goes through a [`Batch`] so one sequence number
//! covers a whole group of puts/deletes atomically.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use cdxd_core::keyspace::{namespace_end, namespace_start, NAMESPACE_ALIAS, NAMESPACE_CAPTURE};
use cdxd_core::{Alias, Capture, Error, Limits, Result, SequenceNumber};

use crate::batch::{mutations_size, Batch, Mutation};
use crate::codec::{alias_key, decode_alias, decode_capture};
use crate::wal::{DurabilityMode, WalReader, WalWriter};

/// An ordered byte-string key-value map with range scans in both
/// directions. The in-memory source of truth for one collection's store;
/// [`Index`] layers durability and batching on top of it.
#[derive(Default, Debug)]
struct OrderedStore {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl OrderedStore {
    fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::Put { key, value } => {
                self.map.insert(key.clone(), value.clone());
            }
            Mutation::Delete { key } => {
                self.map.remove(key);
            }
        }
    }

    /// Snapshot of entries in `[start, end)`, ascending.
    fn range_forward(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.map
            .range(start.to_vec()..end.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Snapshot of entries in `[start, end)`, descending.
    fn range_reverse(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut v = self.range_forward(start, end);
        v.reverse();
        v
    }

    fn len_in_namespace(&self, namespace: u8) -> u64 {
        self.map
            .range(namespace_start(namespace)..namespace_end(namespace))
            .count() as u64
    }
}

/// A finite, forward or reverse sequence of decoded captures taken from a
/// snapshot at creation time. Holds owned data, so there is nothing to
/// release beyond the normal drop of a `Vec` — satisfying the "scoped
/// release on drop" contract trivially.
pub struct CaptureCursor {
    rows: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Iterator for CaptureCursor {
    type Item = Result<Capture>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows
            .next()
            .map(|(k, v)| decode_capture(&k, &v).map_err(|e| Error::StorageError(e.to_string())))
    }
}

/// A finite sequence of decoded aliases taken from a snapshot at creation
/// time.
pub struct AliasCursor {
    rows: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Iterator for AliasCursor {
    type Item = Result<Alias>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows
            .next()
            .map(|(k, v)| decode_alias(&k, &v).map_err(|e| Error::StorageError(e.to_string())))
    }
}

/// The ordered KV index backing one collection: captures, aliases, and
/// (via the raw put/delete API used by `cdxd-access`) rules and policies,
/// all sharing one keyspace discriminated by namespace byte (§6.3).
#[derive(Debug)]
pub struct Index {
    store: RwLock<OrderedStore>,
    wal: Mutex<WalWriter>,
    wal_path: PathBuf,
    seq: AtomicU64,
    alias_cache: RwLock<HashMap<String, String>>,
    limits: Limits,
    compacting: AtomicBool,
}

impl Index {
    /// Open (creating if absent) the index rooted at `dir`, replaying its
    /// WAL to rebuild in-memory state.
    #[instrument(skip(limits), fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>, limits: Limits, mode: DurabilityMode) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| Error::StorageError(e.to_string()))?;
        let wal_path = dir.join("wal.log");

        let mut store = OrderedStore::default();
        let mut alias_cache = HashMap::new();
        let read = WalReader::read_all(&wal_path).map_err(|e| Error::StorageError(e.to_string()))?;
        if read.truncated_tail {
            info!("WAL tail truncated during recovery; discarding incomplete final record");
        }
        let mut max_seq = 0u64;
        for record in &read.records {
            max_seq = max_seq.max(record.seq_no);
            let mutations: Vec<Mutation> = serde_json::from_slice(&record.payload)
                .map_err(|e| Error::StorageError(e.to_string()))?;
            for m in &mutations {
                store.apply(m);
                apply_to_alias_cache(&mut alias_cache, m);
            }
        }
        debug!(records = read.records.len(), max_seq, "recovered from WAL");

        let wal = WalWriter::open(&wal_path, mode).map_err(|e| Error::StorageError(e.to_string()))?;

        Ok(Index {
            store: RwLock::new(store),
            wal: Mutex::new(wal),
            wal_path,
            seq: AtomicU64::new(max_seq),
            alias_cache: RwLock::new(alias_cache),
            limits,
            compacting: AtomicBool::new(false),
        })
    }

    /// Begin a new, empty write batch.
    pub fn begin_update(&self) -> Batch {
        Batch::new()
    }

    /// Atomically install `batch`'s mutations under one new sequence
    /// number. Empty batches are a no-op and do not consume a sequence
    /// number.
    #[instrument(skip(self, batch), fields(mutation_count = batch.len()))]
    pub fn commit(&self, batch: Batch) -> Result<SequenceNumber> {
        if batch.is_empty() {
            return Ok(self.seq.load(Ordering::SeqCst));
        }
        if batch.size_bytes() > self.limits.max_batch_bytes {
            return Err(Error::BatchTooLarge {
                size: batch.size_bytes(),
                limit: self.limits.max_batch_bytes,
            });
        }
        let mutations = batch.into_mutations();
        let payload = serde_json::to_vec(&mutations).map_err(|e| Error::Internal(e.to_string()))?;
        let seq_no = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

        self.wal
            .lock()
            .append(seq_no, &payload)
            .map_err(|e| Error::StorageError(e.to_string()))?;

        let mut store = self.store.write();
        let mut aliases = self.alias_cache.write();
        for m in &mutations {
            store.apply(m);
            apply_to_alias_cache(&mut aliases, m);
        }
        info!(seq_no, mutation_count = mutations.len(), "batch committed");
        Ok(seq_no)
    }

    /// Apply a replicated batch carrying its own sequence number, bypassing
    /// local sequence assignment (§4.6: secondary applies opaque bytes via
    /// `apply_raw_batch`, preserving the primary's numbering).
    pub fn apply_raw_batch(&self, seq_no: SequenceNumber, payload: &[u8]) -> Result<()> {
        let mutations: Vec<Mutation> =
            serde_json::from_slice(payload).map_err(|e| Error::Internal(e.to_string()))?;

        self.wal
            .lock()
            .append(seq_no, payload)
            .map_err(|e| Error::StorageError(e.to_string()))?;

        let mut store = self.store.write();
        let mut aliases = self.alias_cache.write();
        for m in &mutations {
            store.apply(m);
            apply_to_alias_cache(&mut aliases, m);
        }
        drop(store);
        drop(aliases);

        self.seq.fetch_max(seq_no, Ordering::SeqCst);
        Ok(())
    }

    /// Resolve a `urlkey` through the one-hop alias table (§3.2). Returns
    /// `None` if there is no alias for `urlkey`.
    pub fn resolve_alias(&self, urlkey: &str) -> Option<String> {
        self.alias_cache.read().get(urlkey).cloned()
    }

    /// Forward capture scan starting at `start_key` (inclusive), to the end
    /// of the capture namespace.
    pub fn captures_after(&self, start_key: &[u8]) -> CaptureCursor {
        let end = namespace_end(NAMESPACE_CAPTURE);
        let rows = self.store.read().range_forward(start_key, &end);
        CaptureCursor {
            rows: rows.into_iter(),
        }
    }

    /// Reverse capture scan starting at `start_key` (inclusive), down to the
    /// start of the capture namespace.
    pub fn captures_after_reverse(&self, start_key: &[u8]) -> CaptureCursor {
        let start = namespace_start(NAMESPACE_CAPTURE);
        // range_forward takes [start, end); to include start_key itself in
        // a reverse scan we extend the end bound by one byte.
        let mut end = start_key.to_vec();
        end.push(0);
        let rows = self.store.read().range_forward(&start, &end);
        let mut rows = rows;
        rows.reverse();
        CaptureCursor {
            rows: rows.into_iter(),
        }
    }

    /// Forward scan over captures in `[start_key, end_key)` (used by RANGE
    /// match and by bounded EXACT/PREFIX/HOST/DOMAIN scans in the query
    /// planner).
    pub fn captures_range(&self, start_key: &[u8], end_key: &[u8]) -> CaptureCursor {
        let rows = self.store.read().range_forward(start_key, end_key);
        CaptureCursor {
            rows: rows.into_iter(),
        }
    }

    /// Look up one raw, already-namespaced key. Used by `cdxd-access` to
    /// read rules and policies without `cdxd-storage` knowing their shape.
    pub fn get_raw(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.store.read().map.get(key).cloned()
    }

    /// Snapshot scan over raw, already-namespaced keys in `[start, end)`,
    /// ascending. Used by `cdxd-access` to range-scan rules by SURT prefix.
    pub fn scan_raw(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.store.read().range_forward(start, end)
    }

    /// List aliases whose key starts with `prefix`.
    pub fn list_aliases(&self, prefix: &str) -> AliasCursor {
        let start = alias_key(prefix);
        let mut end = start.clone();
        end.push(0xff);
        let rows = self.store.read().range_forward(&start, &end);
        AliasCursor {
            rows: rows.into_iter(),
        }
    }

    /// Engine's count of stored captures. Exact for this in-memory engine,
    /// but callers must treat it as an approximation per the component
    /// contract (§4.3), since other engines only estimate it.
    pub fn estimated_record_count(&self) -> u64 {
        self.store.read().len_in_namespace(NAMESPACE_CAPTURE)
    }

    /// The highest sequence number committed so far.
    pub fn latest_sequence_number(&self) -> SequenceNumber {
        self.seq.load(Ordering::SeqCst)
    }

    /// Force an fsync of the WAL now.
    pub fn flush_wal(&self) -> Result<()> {
        self.wal
            .lock()
            .flush()
            .map_err(|e| Error::StorageError(e.to_string()))
    }

    /// Drop WAL records below `keep_from`, for the `truncate_replication`
    /// operator endpoint.
    pub fn truncate_replication(&self, keep_from: SequenceNumber) -> Result<usize> {
        self.flush_wal()?;
        crate::wal::truncate_before(&self.wal_path, keep_from)
            .map_err(|e| Error::StorageError(e.to_string()))
    }

    /// Path of this index's WAL file, for the change-feed reader.
    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    /// Schedule background compaction. Returns `true` if this call
    /// scheduled a new compaction pass, `false` if one was already running.
    /// This in-memory engine has no out-of-band files to compact, so the
    /// pass completes synchronously and the flag is cleared before return.
    pub fn compact_in_background(&self) -> bool {
        if self
            .compacting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.compacting.store(false, Ordering::SeqCst);
        true
    }

    /// Schedule a background format upgrade. Always `true` for this engine:
    /// there is currently only one on-disk record version, so there is
    /// nothing to upgrade, and the call degenerates to "scheduled and
    /// immediately found nothing to do."
    pub fn upgrade_in_background(&self) -> bool {
        true
    }
}

fn apply_to_alias_cache(cache: &mut HashMap<String, String>, mutation: &Mutation) {
    match mutation {
        Mutation::Put { key, value } if key.first() == Some(&NAMESPACE_ALIAS) => {
            if let Ok(alias) = decode_alias(key, value) {
                cache.insert(alias.alias_surt, alias.target_surt);
            }
        }
        Mutation::Delete { key } if key.first() == Some(&NAMESPACE_ALIAS) => {
            if let Ok(alias_surt) = String::from_utf8(key[1..].to_vec()) {
                cache.remove(&alias_surt);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(urlkey: &str, timestamp: u64) -> Capture {
        Capture {
            urlkey: urlkey.into(),
            timestamp,
            original_url: format!("http://example.com/"),
            mimetype: "text/html".into(),
            status: 200,
            digest: "d".into(),
            redirecturl: "-".into(),
            robotflags: "-".into(),
            length: 1,
            offset: 0,
            filename: "a.warc".into(),
            original_length: None,
            original_offset: None,
            original_filename: None,
        }
    }

    #[test]
    fn commit_assigns_monotonic_sequence_numbers() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();

        let mut b1 = index.begin_update();
        b1.put_capture(&sample("com,example)/", 1));
        let seq1 = index.commit(b1).unwrap();

        let mut b2 = index.begin_update();
        b2.put_capture(&sample("com,example)/", 2));
        let seq2 = index.commit(b2).unwrap();

        assert!(seq1 < seq2);
        assert_eq!(index.latest_sequence_number(), seq2);
    }

    #[test]
    fn dropping_batch_without_commit_discards_it() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        {
            let mut batch = index.begin_update();
            batch.put_capture(&sample("com,example)/", 1));
            // dropped, never committed
        }
        assert_eq!(index.estimated_record_count(), 0);
        assert_eq!(index.latest_sequence_number(), 0);
    }

    #[test]
    fn recovery_replays_wal_into_memory() {
        let dir = tempdir().unwrap();
        {
            let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
            let mut batch = index.begin_update();
            batch.put_capture(&sample("com,example)/", 1));
            batch.put_capture(&sample("com,example)/", 2));
            index.commit(batch).unwrap();
        }
        let reopened = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        assert_eq!(reopened.estimated_record_count(), 2);
        assert_eq!(reopened.latest_sequence_number(), 1);
    }

    #[test]
    fn alias_resolves_one_hop() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let mut batch = index.begin_update();
        batch.put_alias(&Alias {
            alias_surt: "com,example,www)/".into(),
            target_surt: "com,example)/".into(),
        });
        index.commit(batch).unwrap();
        assert_eq!(
            index.resolve_alias("com,example,www)/"),
            Some("com,example)/".to_string())
        );
        assert_eq!(index.resolve_alias("com,example)/"), None);
    }

    #[test]
    fn captures_after_is_sorted_ascending() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let mut batch = index.begin_update();
        batch.put_capture(&sample("com,example)/", 3));
        batch.put_capture(&sample("com,example)/", 1));
        batch.put_capture(&sample("com,example)/", 2));
        index.commit(batch).unwrap();

        let start = crate::codec::capture_key("com,example)/", 0, "", 0);
        let timestamps: Vec<u64> = index
            .captures_after(&start)
            .map(|r| r.unwrap().timestamp)
            .collect();
        assert_eq!(timestamps, vec![1, 2, 3]);
    }

    #[test]
    fn captures_after_reverse_is_sorted_descending() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let mut batch = index.begin_update();
        batch.put_capture(&sample("com,example)/", 1));
        batch.put_capture(&sample("com,example)/", 2));
        batch.put_capture(&sample("com,example)/", 3));
        index.commit(batch).unwrap();

        let start = crate::codec::capture_key("com,example)/", 9999999999999, "zzz", u64::MAX);
        let timestamps: Vec<u64> = index
            .captures_after_reverse(&start)
            .map(|r| r.unwrap().timestamp)
            .collect();
        assert_eq!(timestamps, vec![3, 2, 1]);
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let dir = tempdir().unwrap();
        let limits = Limits {
            max_batch_bytes: 10,
            ..Limits::default()
        };
        let index = Index::open(dir.path(), limits, DurabilityMode::Strict).unwrap();
        let mut batch = index.begin_update();
        batch.put_capture(&sample("com,example)/", 1));
        let err = index.commit(batch).unwrap_err();
        assert!(matches!(err, Error::BatchTooLarge { .. }));
        assert_eq!(index.latest_sequence_number(), 0);
    }

    #[test]
    fn replicated_batch_preserves_primary_sequence_number() {
        let dir = tempdir().unwrap();
        let secondary = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let mut batch = Batch::new();
        batch.put_capture(&sample("com,example)/", 1));
        let payload = serde_json::to_vec(batch.mutations()).unwrap();
        secondary.apply_raw_batch(42, &payload).unwrap();
        assert_eq!(secondary.latest_sequence_number(), 42);
        assert_eq!(secondary.estimated_record_count(), 1);
    }
}
