//! Change feed (§4.6): the wire format a secondary polls to replicate a
//! primary's write batches, and the cursor type that reads them off a WAL.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use cdxd_core::{Error, Result, SequenceNumber};

use crate::index::Index;
use crate::wal::WalReader;

/// One entry in a change-feed response: an opaque, base64-encoded write
/// batch and the sequence number it was committed under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeFeedEntry {
    /// Sequence number this batch was committed under.
    #[serde(rename = "sequenceNumber", with = "seq_as_string")]
    pub sequence_number: SequenceNumber,
    /// Base64-encoded, opaque serialized mutation list.
    #[serde(rename = "writeBatch")]
    pub write_batch: String,
}

mod seq_as_string {
    use cdxd_core::SequenceNumber;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &SequenceNumber, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SequenceNumber, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A bounded page of change-feed entries read starting just after
/// `after`, stopping once the cumulative encoded size reaches `size_limit`
/// bytes (after at least one record has been included, so the feed always
/// makes progress even past an oversized batch).
#[derive(Debug)]
pub struct ChangeCursor {
    entries: Vec<ChangeFeedEntry>,
}

impl ChangeCursor {
    /// The entries in this page, in commit order.
    pub fn entries(&self) -> &[ChangeFeedEntry] {
        &self.entries
    }

    /// Consume the cursor, returning its entries.
    pub fn into_entries(self) -> Vec<ChangeFeedEntry> {
        self.entries
    }

    /// The highest sequence number in this page, if any.
    pub fn last_sequence_number(&self) -> Option<SequenceNumber> {
        self.entries.last().map(|e| e.sequence_number)
    }
}

/// Read a page of the change feed starting just after `after`.
///
/// Returns [`Error::SequenceTruncated`] if `after` is older than the
/// oldest sequence number still retained in the WAL (i.e. it was dropped
/// by `truncate_replication`), since the secondary cannot catch up from a
/// gap it cannot see.
pub fn get_updates_since(
    index: &Index,
    after: SequenceNumber,
    size_limit: usize,
) -> Result<ChangeCursor> {
    let all = WalReader::read_all(index.wal_path()).map_err(|e| Error::StorageError(e.to_string()))?;

    if let Some(oldest) = all.records.first().map(|r| r.seq_no) {
        // seq_no is 1-based and monotonic; a gap between `after` and the
        // oldest retained record means history was truncated underneath it.
        if after > 0 && after + 1 < oldest {
            return Err(Error::SequenceTruncated {
                requested: after,
                oldest,
            });
        }
    } else if after > 0 {
        return Err(Error::SequenceTruncated {
            requested: after,
            oldest: index.latest_sequence_number(),
        });
    }

    let mut entries = Vec::new();
    let mut cumulative = 0usize;
    for record in all.records.into_iter().filter(|r| r.seq_no > after) {
        let encoded = BASE64.encode(&record.payload);
        cumulative += encoded.len();
        entries.push(ChangeFeedEntry {
            sequence_number: record.seq_no,
            write_batch: encoded,
        });
        if cumulative >= size_limit {
            break;
        }
    }

    Ok(ChangeCursor { entries })
}

/// Decode and apply one change-feed entry to a secondary's local index.
pub fn apply_entry(index: &Index, entry: &ChangeFeedEntry) -> Result<()> {
    let payload = BASE64
        .decode(&entry.write_batch)
        .map_err(|e| Error::BadRequest(format!("invalid base64 write batch: {e}")))?;
    index.apply_raw_batch(entry.sequence_number, &payload)
}
