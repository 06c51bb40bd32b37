//! Query execution pipeline (§4.4): scan, filter, resolve access, sort,
//! collapse, limit, serialize.

use std::time::{Duration, Instant};

use tracing::{instrument, warn};

use cdxd_access::AccessControl;
use cdxd_core::surt::{canonicalize, CanonicalizeConfig};
use cdxd_core::{Capture, Error, Limits, Result, Timestamp};
use cdxd_storage::Index;

use crate::closest::merge_by_closest;
use crate::collapse::collapse;
use crate::params::{OutputFormat, QueryParams, SortMode};
use crate::planner::plan;
use crate::serialize::{to_cdx_lines, to_json};

/// The result of running a query: the matching captures after every stage,
/// plus the format they should be serialized in.
#[derive(Debug)]
pub struct QueryResult {
    /// Captures surviving every pipeline stage, in final output order.
    pub captures: Vec<Capture>,
    /// Requested output format.
    pub output: OutputFormat,
    /// Requested field subset, if any.
    pub fields: Option<Vec<String>>,
    /// `true` if `Limits::query_timeout_ms` was exceeded and the pipeline
    /// stopped before running every remaining stage. The captures collected
    /// up to that point are still returned, not discarded.
    pub truncated: bool,
}

impl QueryResult {
    /// Render this result in its requested format.
    pub fn render(&self) -> String {
        match self.output {
            OutputFormat::Cdx => to_cdx_lines(&self.captures, self.fields.as_deref()),
            OutputFormat::Json => to_json(&self.captures, self.fields.as_deref()).to_string(),
        }
    }
}

/// `%20`/`+` are the two legal encodings of a literal space in a query
/// string, and crawlers disagree about which one a redirect target uses.
/// Canonicalizing a redirect URL for `omitSelfRedirects` retries at most
/// once with the other encoding before giving up silently (a self-redirect
/// check is a best-effort refinement, not a correctness requirement).
fn canonicalize_redirect_target(url: &str, config: &CanonicalizeConfig) -> Option<String> {
    if let Ok(key) = canonicalize(url, config) {
        return Some(key);
    }
    let swapped = if url.contains("%20") {
        url.replace("%20", "+")
    } else if url.contains('+') {
        url.replace('+', "%20")
    } else {
        return None;
    };
    canonicalize(&swapped, config).ok()
}

/// Tracks how much of a query's wall-clock budget remains. `None` means the
/// timeout is disabled and every check is free.
struct Deadline(Option<Instant>);

impl Deadline {
    fn new(limits: &Limits, start: Instant) -> Self {
        Deadline(limits.query_timeout_ms.map(|ms| start + Duration::from_millis(ms)))
    }

    fn expired(&self) -> bool {
        matches!(self.0, Some(at) if Instant::now() >= at)
    }
}

/// Run `params` against `index`, applying `access` if present.
#[instrument(skip_all)]
pub fn execute(
    index: &Index,
    access: Option<&AccessControl<'_>>,
    params: &QueryParams,
    config: &CanonicalizeConfig,
    limits: &Limits,
    now: Timestamp,
) -> Result<QueryResult> {
    let start = Instant::now();
    let deadline = Deadline::new(limits, start);

    let (_, bounds) = plan(params, config, |k| index.resolve_alias(k))?;

    let mut captures: Vec<Capture> = index
        .captures_range(&bounds.start, &bounds.end)
        .collect::<Result<Vec<_>>>()?;

    if let Some(from) = params.from {
        captures.retain(|c| c.timestamp >= from);
    }
    if let Some(to) = params.to {
        captures.retain(|c| c.timestamp <= to);
    }

    for filter in &params.filters {
        captures.retain(|c| filter.matches(c));
    }

    if params.omit_self_redirects {
        captures.retain(|c| {
            if !(300..400).contains(&c.status) {
                return true;
            }
            match canonicalize_redirect_target(&c.redirecturl, config) {
                Some(target) => target != c.urlkey,
                None => true,
            }
        });
    }

    let mut truncated = deadline.expired();

    if !truncated {
        if let Some(access) = access {
            let items: Vec<(String, Timestamp)> = captures.iter().map(|c| (c.urlkey.clone(), c.timestamp)).collect();
            let decisions = access.check_access_bulk(&params.access_point, &items, now)?;
            let mut decisions = decisions.into_iter();
            captures.retain(|_| decisions.next().map(|d| d.allowed).unwrap_or(false));
        }
        truncated = deadline.expired();
    }

    if !truncated {
        captures = match params.sort {
            SortMode::Default => captures,
            SortMode::Reverse => {
                captures.reverse();
                captures
            }
            SortMode::Closest => {
                let closest = params.closest.ok_or_else(|| {
                    Error::BadRequest("sort=closest requires a closest parameter".to_string())
                })?;
                merge_by_closest(&captures, closest)
            }
        };
        truncated = deadline.expired();
    }

    if !truncated {
        if let Some(spec) = &params.collapse {
            captures = collapse(&captures, spec);
        }
    }

    let effective_limit = params.limit.unwrap_or(limits.max_num_results).min(limits.max_num_results);
    if captures.len() > effective_limit {
        if params.limit.is_none() {
            warn!(count = captures.len(), effective_limit, "result set truncated to max_num_results");
        }
        captures.truncate(effective_limit);
    }

    if truncated {
        warn!(elapsed_ms = start.elapsed().as_millis() as u64, "query exceeded timeout, returning partial result");
    }

    Ok(QueryResult {
        captures,
        output: params.output,
        fields: params.fields.clone(),
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdxd_storage::DurabilityMode;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn capture(urlkey: &str, timestamp: u64, status: u16) -> Capture {
        Capture {
            urlkey: urlkey.into(),
            timestamp,
            original_url: format!("http://example.com/"),
            mimetype: "text/html".into(),
            status,
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

    fn params(url: &str) -> QueryParams {
        QueryParams {
            url: url.to_string(),
            match_type: crate::params::MatchType::Exact,
            sort: SortMode::Default,
            closest: None,
            from: None,
            to: None,
            filters: vec![],
            collapse: None,
            omit_self_redirects: false,
            limit: None,
            output: OutputFormat::Cdx,
            fields: None,
            range_end: None,
            access_point: "access".to_string(),
        }
    }

    #[test]
    fn exact_query_returns_matching_captures_in_timestamp_order() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let mut b = index.begin_update();
        b.put_capture(&capture("(com,example)/a", 2, 200));
        b.put_capture(&capture("(com,example)/a", 1, 200));
        index.commit(b).unwrap();

        let result = execute(&index, None, &params("http://example.com/a"), &CanonicalizeConfig::default(), &Limits::default(), 0).unwrap();
        let timestamps: Vec<_> = result.captures.iter().map(|c| c.timestamp).collect();
        assert_eq!(timestamps, vec![1, 2]);
        assert!(!result.truncated);
    }

    #[test]
    fn limit_is_applied_after_every_other_stage() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let mut b = index.begin_update();
        for ts in 1..=5u64 {
            b.put_capture(&capture("(com,example)/a", ts, 200));
        }
        index.commit(b).unwrap();

        let mut p = params("http://example.com/a");
        p.limit = Some(2);
        let result = execute(&index, None, &p, &CanonicalizeConfig::default(), &Limits::default(), 0).unwrap();
        assert_eq!(result.captures.len(), 2);
    }

    #[test]
    fn access_control_blocks_hidden_captures() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let mut b = index.begin_update();
        b.put_capture(&capture("(com,example)/a", 1, 200));
        index.commit(b).unwrap();

        let access = AccessControl::new(&index);
        let mut access_points = HashMap::new();
        access_points.insert("access".to_string(), false);
        let policy_id = access
            .put_policy(cdxd_access::AccessPolicy {
                id: 0,
                name: "block".into(),
                access_points,
            })
            .unwrap();
        access
            .put_rule(
                cdxd_access::AccessRule {
                    id: 0,
                    policy_id,
                    surts: vec!["(com,example)/".into()],
                    period: cdxd_core::TimeWindow::unbounded(),
                    access_period: cdxd_core::TimeWindow::unbounded(),
                    pinned: false,
                    private_comment: None,
                    public_comment: None,
                    created: 0,
                    modified: 0,
                },
                "op",
                1,
            )
            .unwrap();

        let result = execute(&index, Some(&access), &params("http://example.com/a"), &CanonicalizeConfig::default(), &Limits::default(), 0).unwrap();
        assert!(result.captures.is_empty());
    }

    #[test]
    fn access_control_respects_query_access_point() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let mut b = index.begin_update();
        b.put_capture(&capture("(com,example)/a", 1, 200));
        index.commit(b).unwrap();

        let access = AccessControl::new(&index);
        let mut access_points = HashMap::new();
        access_points.insert("access".to_string(), false);
        access_points.insert("thumbnails".to_string(), true);
        let policy_id = access
            .put_policy(cdxd_access::AccessPolicy {
                id: 0,
                name: "mixed".into(),
                access_points,
            })
            .unwrap();
        access
            .put_rule(
                cdxd_access::AccessRule {
                    id: 0,
                    policy_id,
                    surts: vec!["(com,example)/".into()],
                    period: cdxd_core::TimeWindow::unbounded(),
                    access_period: cdxd_core::TimeWindow::unbounded(),
                    pinned: false,
                    private_comment: None,
                    public_comment: None,
                    created: 0,
                    modified: 0,
                },
                "op",
                1,
            )
            .unwrap();

        let mut p = params("http://example.com/a");
        p.access_point = "thumbnails".to_string();
        let result = execute(&index, Some(&access), &p, &CanonicalizeConfig::default(), &Limits::default(), 0).unwrap();
        assert_eq!(result.captures.len(), 1);
    }

    #[test]
    fn self_redirect_is_omitted_when_requested() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let mut redirect = capture("(com,example)/a", 1, 301);
        redirect.redirecturl = "http://example.com/a".to_string();
        let mut b = index.begin_update();
        b.put_capture(&redirect);
        index.commit(b).unwrap();

        let mut p = params("http://example.com/a");
        p.omit_self_redirects = true;
        let result = execute(&index, None, &p, &CanonicalizeConfig::default(), &Limits::default(), 0).unwrap();
        assert!(result.captures.is_empty());
    }

    #[test]
    fn zero_timeout_budget_truncates_immediately() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let mut b = index.begin_update();
        b.put_capture(&capture("(com,example)/a", 1, 200));
        index.commit(b).unwrap();

        let limits = Limits {
            query_timeout_ms: Some(1),
            ..Limits::default()
        };
        std::thread::sleep(Duration::from_millis(5));
        let result = execute(&index, None, &params("http://example.com/a"), &CanonicalizeConfig::default(), &limits, 0).unwrap();
        assert!(result.truncated);
    }

    #[test]
    fn disabled_timeout_never_truncates() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), Limits::default(), DurabilityMode::Strict).unwrap();
        let mut b = index.begin_update();
        b.put_capture(&capture("(com,example)/a", 1, 200));
        index.commit(b).unwrap();

        let limits = Limits {
            query_timeout_ms: None,
            ..Limits::default()
        };
        let result = execute(&index, None, &params("http://example.com/a"), &CanonicalizeConfig::default(), &limits, 0).unwrap();
        assert!(!result.truncated);
    }
}
