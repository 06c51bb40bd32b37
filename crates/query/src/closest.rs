//! `sort=closest` merge (§4.4): interleave records before and after a
//! reference timestamp by absolute distance, without re-sorting the whole
//! result set.

use cdxd_core::{Capture, Timestamp};

/// Reorder `ascending` (sorted by timestamp, as returned by a forward scan)
/// so records nearest `closest` come first. Ties — equal distance on both
/// sides — prefer the earlier (smaller-timestamp) record.
pub fn merge_by_closest(ascending: &[Capture], closest: Timestamp) -> Vec<Capture> {
    let split = ascending.partition_point(|c| c.timestamp < closest);
    let mut before = ascending[..split].iter().rev().peekable();
    let mut after = ascending[split..].iter().peekable();

    let mut out = Vec::with_capacity(ascending.len());
    loop {
        match (before.peek(), after.peek()) {
            (Some(b), Some(a)) => {
                let db = closest - b.timestamp;
                let da = a.timestamp - closest;
                if db <= da {
                    out.push((*before.next().unwrap()).clone());
                } else {
                    out.push((*after.next().unwrap()).clone());
                }
            }
            (Some(_), None) => out.push((*before.next().unwrap()).clone()),
            (None, Some(_)) => out.push((*after.next().unwrap()).clone()),
            (None, None) => break,
        }
    }
    out
}
