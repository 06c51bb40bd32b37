//! Scan bound derivation (§4.4): turning a parsed query's `url` and
//! `matchType` into a `[start, end)` byte range over the capture namespace.

use cdxd_core::surt::{canonicalize, host_prefix, CanonicalizeConfig};
use cdxd_core::{Error, Result, MAX_TIMESTAMP};
use cdxd_storage::{capture_key, capture_urlkey_prefix_bytes, prefix_successor};

use crate::params::{MatchType, QueryParams};

/// A `[start, end)` byte range over the capture namespace, and the
/// `urlkey` the query was ultimately resolved to (after alias resolution),
/// used by `omitSelfRedirects` and logging.
pub struct ScanBounds {
    /// Inclusive lower bound.
    pub start: Vec<u8>,
    /// Exclusive upper bound.
    pub end: Vec<u8>,
}

/// Canonicalize `params.url` (and, for `matchType=range`, `rangeEnd`), then
/// derive the scan bounds for `params.match_type`, resolving `urlkey`
/// through `resolve_alias` first.
pub fn plan(
    params: &QueryParams,
    config: &CanonicalizeConfig,
    resolve_alias: impl Fn(&str) -> Option<String>,
) -> Result<(String, ScanBounds)> {
    let canonical = canonicalize(&params.url, config).map_err(|e| Error::BadRequest(e.to_string()))?;
    let urlkey = resolve_alias(&canonical).unwrap_or(canonical);

    let bounds = match params.match_type {
        MatchType::Exact => ScanBounds {
            start: capture_key(&urlkey, 0, "", 0),
            end: capture_key(&urlkey, MAX_TIMESTAMP + 1, "", 0),
        },
        MatchType::Prefix => prefix_bounds(&urlkey),
        MatchType::Host => {
            let mut host = host_prefix(&params.url, config).map_err(|e| Error::BadRequest(e.to_string()))?;
            host.push(')');
            prefix_bounds(&host)
        }
        MatchType::Domain => {
            let host = host_prefix(&params.url, config).map_err(|e| Error::BadRequest(e.to_string()))?;
            prefix_bounds(&host)
        }
        MatchType::Range => {
            let range_end = params
                .range_end
                .as_deref()
                .ok_or_else(|| Error::BadRequest("matchType=range requires rangeEnd".to_string()))?;
            let end_urlkey = canonicalize(range_end, config).map_err(|e| Error::BadRequest(e.to_string()))?;
            ScanBounds {
                start: capture_key(&urlkey, 0, "", 0),
                end: capture_key(&end_urlkey, 0, "", 0),
            }
        }
        MatchType::Default => unreachable!("parse_query resolves MatchType::Default before plan() is called"),
    };

    Ok((urlkey, bounds))
}

fn prefix_bounds(urlkey_prefix: &str) -> ScanBounds {
    let start = capture_urlkey_prefix_bytes(urlkey_prefix);
    let end = prefix_successor(&start).unwrap_or_else(|| {
        // All-0xFF prefix has no finite successor; fall back to a bound far
        // past any real key (timestamps never reach u64::MAX).
        let mut v = start.clone();
        v.push(0xFF);
        v
    });
    ScanBounds { start, end }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CanonicalizeConfig {
        CanonicalizeConfig::default()
    }

    #[test]
    fn exact_bounds_cover_only_that_urlkey() {
        let params = QueryParams {
            url: "http://example.com/a".into(),
            match_type: MatchType::Exact,
            sort: crate::params::SortMode::Default,
            closest: None,
            from: None,
            to: None,
            filters: vec![],
            collapse: None,
            omit_self_redirects: false,
            limit: None,
            output: crate::params::OutputFormat::Cdx,
            fields: None,
            range_end: None,
            access_point: "access".to_string(),
        };
        let (urlkey, bounds) = plan(&params, &cfg(), |_| None).unwrap();
        assert_eq!(urlkey, "(com,example)/a");
        let inside = capture_key(&urlkey, 20200101000000, "f", 0);
        let outside = capture_key("(com,example)/ab", 1, "f", 0);
        assert!(inside >= bounds.start && inside < bounds.end);
        assert!(outside >= bounds.end);
    }

    #[test]
    fn prefix_bounds_include_longer_urlkeys() {
        let params = QueryParams {
            url: "http://example.com/a".into(),
            match_type: MatchType::Prefix,
            sort: crate::params::SortMode::Default,
            closest: None,
            from: None,
            to: None,
            filters: vec![],
            collapse: None,
            omit_self_redirects: false,
            limit: None,
            output: crate::params::OutputFormat::Cdx,
            fields: None,
            range_end: None,
            access_point: "access".to_string(),
        };
        let (urlkey, bounds) = plan(&params, &cfg(), |_| None).unwrap();
        let inside = capture_key(&format!("{urlkey}/more"), 1, "f", 0);
        assert!(inside >= bounds.start && inside < bounds.end);
    }

    #[test]
    fn alias_resolution_redirects_the_scan_key() {
        let params = QueryParams {
            url: "http://example.com/a".into(),
            match_type: MatchType::Exact,
            sort: crate::params::SortMode::Default,
            closest: None,
            from: None,
            to: None,
            filters: vec![],
            collapse: None,
            omit_self_redirects: false,
            limit: None,
            output: crate::params::OutputFormat::Cdx,
            fields: None,
            range_end: None,
            access_point: "access".to_string(),
        };
        let (urlkey, _) = plan(&params, &cfg(), |k| {
            assert_eq!(k, "(com,example)/a");
            Some("(com,example)/canonical-target".to_string())
        })
        .unwrap();
        assert_eq!(urlkey, "(com,example)/canonical-target");
    }
}
