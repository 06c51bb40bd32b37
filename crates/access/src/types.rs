//! Access control data model (§3.3/§3.4, §4.5): rules matching a set of SURT
//! prefixes to a policy, and the policies themselves.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use cdxd_core::{TimeWindow, Timestamp};

/// A named access policy: a map from access point name to whether a
/// request arriving at that access point is allowed. An access point not
/// present in the map is treated as not allowed, so adding a new access
/// point to a deployment defaults every existing policy to denying it
/// until an operator opts it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Server-assigned identifier, referenced by [`AccessRule::policy_id`].
    pub id: u64,
    /// Human-readable name, shown in admin listings.
    pub name: String,
    /// Access point name -> allowed.
    pub access_points: HashMap<String, bool>,
}

/// A rule matching requests whose SURT falls under one of `surts` (or, if
/// `surts` is empty, any SURT at all), resolving to the policy named
/// `policy_id`. Two independent time windows gate the rule: `period` is
/// checked against the capture's own timestamp, `access_period` against
/// the time the request is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Stable identifier, used as the sort tie-break between otherwise
    /// equally specific rules.
    pub id: u64,
    /// Identifier of the [`AccessPolicy`] this rule resolves to.
    pub policy_id: u64,
    /// SURT prefixes this rule governs. An empty list matches every SURT.
    pub surts: Vec<String>,
    /// Window, over the capture's own timestamp, during which this rule
    /// applies to that capture.
    pub period: TimeWindow,
    /// Window, over the time of access, during which this rule is in
    /// force.
    pub access_period: TimeWindow,
    /// Pinned rules are preferred over unpinned ones regardless of prefix
    /// length, for operators who need to force an exception.
    pub pinned: bool,
    /// Free-text comment, not shown to unauthenticated callers.
    pub private_comment: Option<String>,
    /// Free-text comment safe to surface publicly alongside a decision.
    pub public_comment: Option<String>,
    /// Epoch-seconds timestamp this rule was first stored.
    pub created: u64,
    /// Epoch-seconds timestamp this rule was last stored.
    pub modified: u64,
}

impl AccessRule {
    /// Length of the longest entry of `surts` that is a prefix of `surt`,
    /// or `0` if `surts` is empty (matches everything, least specific).
    /// Callers must check [`AccessRule::matches_surt`] first; this does not
    /// itself imply a match when `surts` is non-empty and none apply.
    pub fn longest_matching_prefix_len(&self, surt: &str) -> usize {
        self.surts
            .iter()
            .filter(|p| surt.starts_with(p.as_str()))
            .map(|p| p.len())
            .max()
            .unwrap_or(0)
    }

    /// Whether one of `surts` is a prefix of `surt` (or `surts` is empty).
    pub fn matches_surt(&self, surt: &str) -> bool {
        self.surts.is_empty() || self.surts.iter().any(|p| surt.starts_with(p.as_str()))
    }

    /// Whether this rule applies to a capture made at `capture_time` and
    /// accessed at `access_time`: the SURT matches and both time windows
    /// contain their respective timestamp.
    pub fn matches(&self, surt: &str, capture_time: Timestamp, access_time: Timestamp) -> bool {
        self.matches_surt(surt) && self.period.contains(capture_time) && self.access_period.contains(access_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(surts: &[&str]) -> AccessRule {
        AccessRule {
            id: 1,
            policy_id: 1,
            surts: surts.iter().map(|s| s.to_string()).collect(),
            period: TimeWindow::unbounded(),
            access_period: TimeWindow::unbounded(),
            pinned: false,
            private_comment: None,
            public_comment: None,
            created: 0,
            modified: 0,
        }
    }

    #[test]
    fn matches_when_surt_starts_with_any_prefix() {
        assert!(rule(&["com,example)/"]).matches_surt("com,example)/foo"));
        assert!(!rule(&["com,example)/foo"]).matches_surt("com,example)/"));
    }

    #[test]
    fn empty_surts_matches_everything() {
        assert!(rule(&[]).matches_surt("com,anything)/whatsoever"));
    }

    #[test]
    fn matches_any_of_several_prefixes() {
        let r = rule(&["com,example)/", "org,example)/"]);
        assert!(r.matches_surt("org,example)/foo"));
        assert!(!r.matches_surt("net,example)/"));
    }

    #[test]
    fn longest_matching_prefix_picks_the_most_specific() {
        let r = rule(&["com,example)/", "com,example)/foo"]);
        assert_eq!(r.longest_matching_prefix_len("com,example)/foo/bar"), "com,example)/foo".len());
    }

    #[test]
    fn capture_period_and_access_period_are_independent() {
        let mut r = rule(&["com,example)/"]);
        r.period = TimeWindow {
            start: Some(100),
            end: Some(200),
        };
        r.access_period = TimeWindow {
            start: Some(1000),
            end: Some(2000),
        };
        assert!(r.matches("com,example)/", 150, 1500));
        assert!(!r.matches("com,example)/", 50, 1500));
        assert!(!r.matches("com,example)/", 150, 500));
    }
}
