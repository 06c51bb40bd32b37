//! Access decision algorithm (§4.5): resolve a SURT against the stored
//! rules and policies of one collection.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use tracing::debug;

use cdxd_core::keyspace::{namespace_end, namespace_start, NAMESPACE_POLICY, NAMESPACE_RULE};
use cdxd_core::{Error, Result, Timestamp};
use cdxd_storage::Index;

use crate::codec::{decode_policy, decode_rule, encode_policy, encode_rule, policy_key, rule_key};
use crate::types::{AccessPolicy, AccessRule};

/// The outcome of resolving one SURT at one access point: whether access
/// is allowed, and which rule/policy (if any) produced that answer, for
/// the caller to surface to an operator or end user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request is allowed through the named access point.
    pub allowed: bool,
    /// The rule that matched, if any. `None` means no rule matched and
    /// `allowed` is the default (`true`).
    pub rule_id: Option<u64>,
    /// The policy the matching rule resolved to, if any.
    pub policy_id: Option<u64>,
    /// The matching rule's public comment, safe to surface to the caller.
    pub public_comment: Option<String>,
}

impl Decision {
    fn default_allow() -> Self {
        Decision {
            allowed: true,
            rule_id: None,
            policy_id: None,
            public_comment: None,
        }
    }
}

/// Access control surface over one collection's `Index`. Rules and
/// policies share the collection's ordered keyspace with captures and
/// aliases, under their own namespace bytes.
pub struct AccessControl<'a> {
    index: &'a Index,
}

impl<'a> AccessControl<'a> {
    /// Wrap an index with access-control operations.
    pub fn new(index: &'a Index) -> Self {
        AccessControl { index }
    }

    /// Validate and store a rule (§4.5 `put_rule(rule, user) -> id`).
    /// `rule.id == 0` assigns a new server-side identifier; any other value
    /// updates the existing rule of that id, preserving its `created`
    /// stamp. On any validation failure, returns [`Error::Conflict`]
    /// carrying *every* violation found, not just the first, so an
    /// operator can fix a rule in one round trip.
    pub fn put_rule(&self, mut rule: AccessRule, user: &str, now: u64) -> Result<u64> {
        let existing = if rule.id != 0 { self.get_rule(rule.id)? } else { None };

        let violations = self.validate_rule(&rule);
        if !violations.is_empty() {
            return Err(Error::Conflict(violations));
        }

        if rule.id == 0 {
            rule.id = self.next_rule_id()?;
        }
        rule.created = existing.map(|e| e.created).unwrap_or(now);
        rule.modified = now;

        let (key, value) = encode_rule(&rule);
        let mut batch = self.index.begin_update();
        batch.put_raw(key, value);
        self.index.commit(batch)?;
        debug!(user, rule_id = rule.id, "access rule stored");
        Ok(rule.id)
    }

    fn validate_rule(&self, rule: &AccessRule) -> Vec<String> {
        let mut violations = Vec::new();
        if self.get_policy(rule.policy_id).is_none() {
            violations.push(format!("no such policy: {}", rule.policy_id));
        }
        if rule.period.is_inverted() {
            violations.push("period start must not be after end".to_string());
        }
        if rule.access_period.is_inverted() {
            violations.push("access_period start must not be after end".to_string());
        }
        if rule.surts.iter().any(|s| s.as_bytes().contains(&0x00)) {
            violations.push("surt prefixes must not contain a NUL byte".to_string());
        }
        violations
    }

    fn next_rule_id(&self) -> Result<u64> {
        Ok(self.list_rules()?.iter().map(|r| r.id).max().unwrap_or(0) + 1)
    }

    fn next_policy_id(&self) -> Result<u64> {
        Ok(self.list_policies()?.iter().map(|p| p.id).max().unwrap_or(0) + 1)
    }

    /// Fetch one rule by id.
    pub fn get_rule(&self, id: u64) -> Result<Option<AccessRule>> {
        self.index
            .get_raw(&rule_key(id))
            .map(|v| decode_rule(&v))
            .transpose()
            .map_err(|e| Error::StorageError(e.to_string()))
    }

    /// Remove the rule with the given id. Returns `true` if it existed.
    pub fn delete_rule(&self, id: u64) -> Result<bool> {
        let existed = self.get_rule(id)?.is_some();
        let mut batch = self.index.begin_update();
        batch.delete_raw(rule_key(id));
        self.index.commit(batch)?;
        Ok(existed)
    }

    /// Validate and store a policy. `policy.id == 0` assigns a new
    /// server-side identifier; any other value replaces the existing
    /// policy of that id.
    pub fn put_policy(&self, mut policy: AccessPolicy) -> Result<u64> {
        if policy.name.is_empty() {
            return Err(Error::Conflict(vec!["policy name must not be empty".to_string()]));
        }
        if policy.id == 0 {
            policy.id = self.next_policy_id()?;
        }
        let (key, value) = encode_policy(&policy);
        let mut batch = self.index.begin_update();
        batch.put_raw(key, value);
        self.index.commit(batch)?;
        Ok(policy.id)
    }

    /// Fetch one policy by id.
    pub fn get_policy(&self, id: u64) -> Option<AccessPolicy> {
        self.index.get_raw(&policy_key(id)).and_then(|v| decode_policy(&v).ok())
    }

    /// All stored rules, in no particular order.
    pub fn list_rules(&self) -> Result<Vec<AccessRule>> {
        let rows = self
            .index
            .scan_raw(&namespace_start(NAMESPACE_RULE), &namespace_end(NAMESPACE_RULE));
        rows.iter()
            .map(|(_, v)| decode_rule(v).map_err(|e| Error::StorageError(e.to_string())))
            .collect()
    }

    /// All stored policies, in no particular order.
    pub fn list_policies(&self) -> Result<Vec<AccessPolicy>> {
        let rows = self.index.scan_raw(
            &namespace_start(NAMESPACE_POLICY),
            &namespace_end(NAMESPACE_POLICY),
        );
        rows.iter()
            .map(|(_, v)| decode_policy(v).map_err(|e| Error::StorageError(e.to_string())))
            .collect()
    }

    /// Decide access for `access_point` on one SURT, captured at
    /// `capture_time` and accessed at `access_time`.
    ///
    /// Candidate rules are those whose `surts` list contains a prefix of
    /// `surt` (or is empty), whose `period` contains `capture_time`, and
    /// whose `access_period` contains `access_time`. Among those, the
    /// winner is chosen by: pinned rules first, then longest matching
    /// `surts` prefix (most specific), then lowest `id` as a final
    /// tie-break. The winning rule's policy is consulted for
    /// `access_point`; an access point absent from the policy's map is
    /// treated as not allowed. With no matching rule, access is allowed by
    /// default.
    pub fn check_access(
        &self,
        access_point: &str,
        surt: &str,
        capture_time: Timestamp,
        access_time: Timestamp,
    ) -> Result<Decision> {
        let rules = self.list_rules()?;
        self.decide(&rules, access_point, surt, capture_time, access_time)
    }

    /// Decide access for many `(surt, capture_time)` pairs at once, all at
    /// the same `access_point` and `access_time`, scanning the rule set
    /// only once. Results are returned in input order.
    pub fn check_access_bulk(
        &self,
        access_point: &str,
        items: &[(String, Timestamp)],
        access_time: Timestamp,
    ) -> Result<Vec<Decision>> {
        let rules = self.list_rules()?;
        items
            .iter()
            .map(|(surt, capture_time)| self.decide(&rules, access_point, surt, *capture_time, access_time))
            .collect()
    }

    fn decide(
        &self,
        rules: &[AccessRule],
        access_point: &str,
        surt: &str,
        capture_time: Timestamp,
        access_time: Timestamp,
    ) -> Result<Decision> {
        let mut candidates: Vec<&AccessRule> = rules
            .iter()
            .filter(|r| r.matches(surt, capture_time, access_time))
            .collect();
        candidates.sort_by_key(|r| (Reverse(r.pinned), Reverse(r.longest_matching_prefix_len(surt)), r.id));

        let Some(winner) = candidates.first() else {
            return Ok(Decision::default_allow());
        };
        let policy = self
            .get_policy(winner.policy_id)
            .ok_or_else(|| Error::Internal(format!("rule {} references missing policy {}", winner.id, winner.policy_id)))?;
        let allowed = policy.access_points.get(access_point).copied().unwrap_or(false);
        debug!(surt, rule_id = winner.id, policy_id = policy.id, access_point, allowed, "access rule matched");
        Ok(Decision {
            allowed,
            rule_id: Some(winner.id),
            policy_id: Some(policy.id),
            public_comment: winner.public_comment.clone(),
        })
    }
}
