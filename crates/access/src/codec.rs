//! Key/value encoding for rules and policies.
//!
//! Captures and aliases are the hot path and use the packed binary codec in
//! `cdxd_storage::codec`; rules and policies are low-volume administrative
//! objects, keyed by their server-assigned `id` and encoded as JSON values.
//! A rule's `surts` list is matched by scanning every stored rule rather
//! than by a secondary prefix index: the rule set of one collection is
//! small enough (operator-maintained, not per-capture) that the full scan
//! `decision::list_rules` already does for arbitration is cheaper to keep
//! correct than a multi-entry index kept in sync across `surts` edits.

use cdxd_core::keyspace::{namespaced, NAMESPACE_POLICY, NAMESPACE_RULE};

use crate::types::{AccessPolicy, AccessRule};

/// Build a rule's storage key, ordered by `id`.
pub fn rule_key(id: u64) -> Vec<u8> {
    namespaced(NAMESPACE_RULE, &id.to_be_bytes())
}

/// Encode a rule into its `(key, value)` pair.
pub fn encode_rule(rule: &AccessRule) -> (Vec<u8>, Vec<u8>) {
    let key = rule_key(rule.id);
    let value = serde_json::to_vec(rule).expect("AccessRule serializes");
    (key, value)
}

/// Decode a rule from its stored value (the key carries no information the
/// value does not already repeat, so only the value is needed).
pub fn decode_rule(value: &[u8]) -> serde_json::Result<AccessRule> {
    serde_json::from_slice(value)
}

/// Build a policy's storage key, ordered by `id`.
pub fn policy_key(id: u64) -> Vec<u8> {
    namespaced(NAMESPACE_POLICY, &id.to_be_bytes())
}

/// Encode a policy into its `(key, value)` pair.
pub fn encode_policy(policy: &AccessPolicy) -> (Vec<u8>, Vec<u8>) {
    let key = policy_key(policy.id);
    let value = serde_json::to_vec(policy).expect("AccessPolicy serializes");
    (key, value)
}

/// Decode a policy from its stored value.
pub fn decode_policy(value: &[u8]) -> serde_json::Result<AccessPolicy> {
    serde_json::from_slice(value)
}
