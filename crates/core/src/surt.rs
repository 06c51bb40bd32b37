//! SURT (Sort-friendly URI Reordering Transform) canonicalization.
//!
//! Turns a URL into a key whose lexicographic byte order matches
//! domain/subdomain/path grouping, so range scans over the ordered store
//! implement exact, prefix, host, and domain URL matching without a
//! secondary index. See [`canonicalize`] for the full algorithm.

use std::collections::BTreeSet;
use thiserror::Error;
use url::Url;

/// Tracking query parameters stripped by default. Not exhaustive; operators
/// extend this set via [`CanonicalizeConfig::tracking_param_blocklist`].
pub const DEFAULT_TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
];

/// Query parameter name fragments that usually carry session identifiers,
/// checked with [`CanonicalizeConfig::strip_session_ids`].
const SESSION_ID_PARAMS: &[&str] = &["jsessionid", "phpsessid", "sid", "sessionid"];

/// Canonicalizer configuration. Must stay identical across the lifetime of a
/// collection's data: changing any field invalidates existing `urlkey`
/// values, so a configuration change is a migration, not a hot-reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalizeConfig {
    /// Strip a leading `www.` label from the host.
    pub strip_www: bool,
    /// Lowercase the path component (hosts and schemes are always
    /// lowercased; paths are case-sensitive on most servers, so this
    /// defaults to `false`).
    pub lowercase_path: bool,
    /// Drop query parameters that look like session identifiers.
    pub strip_session_ids: bool,
    /// Query parameter names to drop unconditionally (tracking params).
    pub tracking_param_blocklist: BTreeSet<String>,
}

impl Default for CanonicalizeConfig {
    fn default() -> Self {
        CanonicalizeConfig {
            strip_www: true,
            lowercase_path: false,
            strip_session_ids: false,
            tracking_param_blocklist: DEFAULT_TRACKING_PARAMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Errors raised while canonicalizing a URL.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonicalizeError {
    /// The input is not an absolute URL (no scheme, or no authority).
    #[error("not an absolute URL: {0}")]
    NotAbsolute(String),

    /// The input could not be parsed as a URL at all.
    #[error("invalid URL: {0}")]
    Malformed(String),

    /// A `%XX` escape was truncated or used non-hex digits.
    #[error("invalid percent-encoding in: {0}")]
    InvalidPercentEncoding(String),
}

/// Canonicalize a GET request's URL into its SURT key.
///
/// Equivalent to [`canonicalize_request`] with method `GET` and no body.
pub fn canonicalize(url: &str, config: &CanonicalizeConfig) -> Result<String, CanonicalizeError> {
    canonicalize_request(url, "GET", None, config)
}

/// Canonicalize a request (URL, method, and — for non-GET methods — body)
/// into its SURT key.
///
/// For non-GET methods the canonical input is augmented with
/// `__wb_method=<METHOD>` and the body parsed as `application/
/// x-www-form-urlencoded` query parameters, appended before the parameters
/// are sorted. This keeps POST captures adjacent to their GET counterparts
/// in the index while remaining distinguishable from them.
pub fn canonicalize_request(
    url: &str,
    method: &str,
    body: Option<&str>,
    config: &CanonicalizeConfig,
) -> Result<String, CanonicalizeError> {
    let parsed = Url::parse(url).map_err(|e| CanonicalizeError::Malformed(e.to_string()))?;
    if parsed.cannot_be_a_base() {
        return Err(CanonicalizeError::NotAbsolute(url.to_string()));
    }
    let scheme = parsed.scheme().to_ascii_lowercase();
    let host = parsed
        .host_str()
        .ok_or_else(|| CanonicalizeError::NotAbsolute(url.to_string()))?
        .to_ascii_lowercase();

    let mut key = String::new();
    key.push_str(&host_prefix_from_parts(&host, &scheme, &parsed, config));
    key.push(')');
    key.push_str(&normalize_path(parsed.path(), config.lowercase_path)?);

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.retain(|(k, _)| !config.tracking_param_blocklist.contains(k));
    if config.strip_session_ids {
        params.retain(|(k, _)| !is_session_id_param(k));
    }

    let method_upper = method.to_ascii_uppercase();
    if method_upper != "GET" {
        params.push(("__wb_method".to_string(), method_upper));
        if let Some(body) = body {
            for (k, v) in url::form_urlencoded::parse(body.as_bytes()) {
                params.push((k.into_owned(), v.into_owned()));
            }
        }
    }

    params.sort();
    if !params.is_empty() {
        key.push('?');
        let joined = params
            .iter()
            .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
            .collect::<Vec<_>>()
            .join("&");
        key.push_str(&joined);
    }

    Ok(key)
}

/// Compute the reversed-host-label prefix of a URL's SURT key, *without* the
/// closing paren: `"www.example.com"` → `"(com,example,www"`.
///
/// This is the shared core of both the HOST and DOMAIN match types (§4.4):
/// appending `")"` requires an exact host boundary (HOST); using the bare
/// prefix allows further comma-separated labels after it, matching any
/// subdomain (DOMAIN).
pub fn host_prefix(url: &str, config: &CanonicalizeConfig) -> Result<String, CanonicalizeError> {
    let parsed = Url::parse(url).map_err(|e| CanonicalizeError::Malformed(e.to_string()))?;
    if parsed.cannot_be_a_base() {
        return Err(CanonicalizeError::NotAbsolute(url.to_string()));
    }
    let scheme = parsed.scheme().to_ascii_lowercase();
    let host = parsed
        .host_str()
        .ok_or_else(|| CanonicalizeError::NotAbsolute(url.to_string()))?
        .to_ascii_lowercase();
    Ok(host_prefix_from_parts(&host, &scheme, &parsed, config))
}

fn host_prefix_from_parts(host: &str, scheme: &str, parsed: &Url, config: &CanonicalizeConfig) -> String {
    let host = if config.strip_www {
        host.strip_prefix("www.").unwrap_or(host)
    } else {
        host
    };
    let mut labels: Vec<&str> = host.split('.').collect();
    labels.reverse();
    let mut out = String::from("(");
    out.push_str(&labels.join(","));
    let port = parsed.port().filter(|&p| Some(p) != default_port(scheme));
    if let Some(p) = port {
        out.push(':');
        out.push_str(&p.to_string());
    }
    out
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        "ftp" => Some(21),
        _ => None,
    }
}

fn is_session_id_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SESSION_ID_PARAMS.iter().any(|s| lower.contains(s))
}

fn normalize_path(raw: &str, lowercase: bool) -> Result<String, CanonicalizeError> {
    let decoded = normalize_percent_encoding(raw)?;
    let resolved = remove_dot_segments(&decoded);
    Ok(if lowercase {
        resolved.to_ascii_lowercase()
    } else {
        resolved
    })
}

/// Decode `%XX` escapes that represent unreserved characters, and
/// re-encode the rest with uppercase hex digits, per RFC 3986 §6.2.2.2.
fn normalize_percent_encoding(s: &str) -> Result<String, CanonicalizeError> {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(CanonicalizeError::InvalidPercentEncoding(s.to_string()));
            }
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                .map_err(|_| CanonicalizeError::InvalidPercentEncoding(s.to_string()))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| CanonicalizeError::InvalidPercentEncoding(s.to_string()))?;
            if is_unreserved(byte) {
                out.push(byte as char);
            } else {
                out.push_str(&format!("%{byte:02X}"));
            }
            i += 3;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    Ok(out)
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

/// Resolve `.`/`..` segments and collapse repeated `/`, preserving a
/// trailing slash if the input had one. Always returns a path starting with
/// `/`.
fn remove_dot_segments(path: &str) -> String {
    let trailing_slash = path.ends_with('/') || path.is_empty();
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }
    let mut result = String::from("/");
    result.push_str(&stack.join("/"));
    if trailing_slash && !result.ends_with('/') {
        result.push('/');
    }
    result
}
