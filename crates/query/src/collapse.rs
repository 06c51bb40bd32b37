//! Collapse-adjacent-duplicates (§4.4): drop runs of records that share a
//! collapse key, keeping either the first or last of each run.

use cdxd_core::Capture;

use crate::params::{CollapseKeep, CollapseSpec};
use crate::serialize::field_value;

fn group_key(capture: &Capture, spec: &CollapseSpec) -> String {
    let value = field_value(capture, &spec.field).unwrap_or_default();
    match spec.truncate_len {
        Some(n) => value.chars().take(n).collect(),
        None => value,
    }
}

/// Apply `spec` to an already-ordered `captures` slice, dispatching to
/// [`collapse_to_first`] or [`collapse_to_last`].
pub fn collapse(captures: &[Capture], spec: &CollapseSpec) -> Vec<Capture> {
    match spec.keep {
        CollapseKeep::First => collapse_to_first(captures, spec),
        CollapseKeep::Last => collapse_to_last(captures, spec),
    }
}

/// Keep the first record of each run of equal collapse keys. A streaming
/// predicate: only the previous key is ever held, so this runs in O(1)
/// memory beyond the output.
pub fn collapse_to_first(captures: &[Capture], spec: &CollapseSpec) -> Vec<Capture> {
    let mut out = Vec::new();
    let mut last_key: Option<String> = None;
    for c in captures {
        let key = group_key(c, spec);
        if last_key.as_deref() != Some(key.as_str()) {
            out.push(c.clone());
            last_key = Some(key);
        }
    }
    out
}

/// Keep the last record of each run of equal collapse keys. Unlike
/// [`collapse_to_first`], this cannot know a record is the last of its run
/// until the next (different-keyed) record arrives, so it holds exactly
/// one pending record as a one-step lookahead buffer.
pub fn collapse_to_last(captures: &[Capture], spec: &CollapseSpec) -> Vec<Capture> {
    let mut out = Vec::new();
    let mut pending: Option<(String, Capture)> = None;
    for c in captures {
        let key = group_key(c, spec);
        match pending.take() {
            Some((pkey, _)) if pkey == key => pending = Some((key, c.clone())),
            Some((_, prev)) => {
                out.push(prev);
                pending = Some((key, c.clone()));
            }
            None => pending = Some((key, c.clone())),
        }
    }
    if let Some((_, prev)) = pending {
        out.push(prev);
    }
    out
}
