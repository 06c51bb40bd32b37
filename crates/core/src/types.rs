//! Data model: captures, aliases, and the time-window types access rules
//! are built from.

use serde::{Deserialize, Serialize};

/// A 14-digit capture timestamp, `YYYYMMDDhhmmss`, stored as an integer in
/// `0..=99_999_999_999_999`.
pub type Timestamp = u64;

/// The maximum value a [`Timestamp`] may hold: `99999999999999`.
pub const MAX_TIMESTAMP: Timestamp = 99_999_999_999_999;

/// A monotonically increasing identifier assigned to each committed write
/// batch. Strictly increasing across commits in one collection; gaps are
/// allowed after WAL truncation, reordering never happens.
pub type SequenceNumber = u64;

/// One archived HTTP response, keyed by `(urlkey, timestamp, filename,
/// offset)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// SURT form of the captured URL; the primary sort key.
    pub urlkey: String,
    /// Capture time, 14-digit `YYYYMMDDhhmmss`.
    pub timestamp: Timestamp,
    /// The URL as crawled, before canonicalization.
    pub original_url: String,
    /// Response MIME type, e.g. `text/html`.
    pub mimetype: String,
    /// HTTP status code.
    pub status: u16,
    /// Content digest (e.g. SHA-1 of the payload).
    pub digest: String,
    /// Redirect target, if the response was a redirect.
    pub redirecturl: String,
    /// Robots exclusion flags observed at crawl time.
    pub robotflags: String,
    /// Length, in bytes, of the stored (possibly compressed) record.
    pub length: u64,
    /// Byte offset of the record within `filename`.
    pub offset: u64,
    /// Name of the WARC file containing the record.
    pub filename: String,
    /// CDX14: length of the original, uncompressed record.
    pub original_length: Option<u64>,
    /// CDX14: offset of the original record.
    pub original_offset: Option<u64>,
    /// CDX14: filename of the original (pre-rewrite) container.
    pub original_filename: Option<String>,
}

impl Capture {
    /// The tuple `(urlkey, timestamp, filename, offset)` used for primary
    /// key ordering and idempotent-upsert comparisons.
    pub fn primary_key(&self) -> (&str, Timestamp, &str, u64) {
        (&self.urlkey, self.timestamp, &self.filename, self.offset)
    }
}

/// A redirect mapping from one SURT key to another. Resolved exactly one hop
/// deep; there is no transitive chasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// SURT key being redirected.
    pub alias_surt: String,
    /// SURT key it redirects to.
    pub target_surt: String,
}

/// An inclusive time window over 14-digit timestamps, used both for a rule's
/// capture-time `period` and its `access_period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive lower bound, or `None` for unbounded.
    pub start: Option<Timestamp>,
    /// Inclusive upper bound, or `None` for unbounded.
    pub end: Option<Timestamp>,
}

impl TimeWindow {
    /// A window with no bounds: matches any timestamp.
    pub fn unbounded() -> Self {
        TimeWindow {
            start: None,
            end: None,
        }
    }

    /// True if `t` falls within `[start, end]`, treating `None` bounds as
    /// open.
    pub fn contains(&self, t: Timestamp) -> bool {
        let after_start = self.start.map_or(true, |s| t >= s);
        let before_end = self.end.map_or(true, |e| t <= e);
        after_start && before_end
    }

    /// True if the window is inverted (`start > end` when both are set),
    /// which `put_rule` validation rejects.
    pub fn is_inverted(&self) -> bool {
        matches!((self.start, self.end), (Some(s), Some(e)) if s > e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_orders_by_urlkey_then_timestamp_then_filename_then_offset() {
        let a = Capture {
            urlkey: "com,example)/".into(),
            timestamp: 1,
            filename: "a.warc".into(),
            offset: 0,
            ..sample_capture()
        };
        let b = Capture {
            urlkey: "com,example)/".into(),
            timestamp: 2,
            filename: "a.warc".into(),
            offset: 0,
            ..sample_capture()
        };
        assert!(a.primary_key() < b.primary_key());
    }

    #[test]
    fn unbounded_window_contains_everything() {
        let w = TimeWindow::unbounded();
        assert!(w.contains(0));
        assert!(w.contains(MAX_TIMESTAMP));
    }

    #[test]
    fn bounded_window_excludes_outside_values() {
        let w = TimeWindow {
            start: Some(20200101000000),
            end: Some(20201231235959),
        };
        assert!(w.contains(20200601000000));
        assert!(!w.contains(20190101000000));
        assert!(!w.contains(20210101000000));
    }

    #[test]
    fn inverted_window_detected() {
        let w = TimeWindow {
            start: Some(20201231235959),
            end: Some(20200101000000),
        };
        assert!(w.is_inverted());
    }

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
            length: 100,
            offset: 0,
            filename: "a.warc".into(),
            original_length: None,
            original_offset: None,
            original_filename: None,
        }
    }
}
