//! Query parameter parsing and validation (§4.4).

use cdxd_core::{Error, Result, Timestamp};

use crate::filter::Filter;

/// How `url` is matched against stored `urlkey`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// Not yet resolved: auto-detected from `url`'s shape during parsing
    /// (trailing `*` -> [`MatchType::Prefix`], leading `*.` ->
    /// [`MatchType::Domain`], otherwise [`MatchType::Exact`]). Never
    /// appears on a [`QueryParams`] returned by [`parse_query`].
    Default,
    /// Only records whose `urlkey` equals the canonicalized `url`.
    Exact,
    /// Records whose `urlkey` has the canonicalized `url` as a prefix.
    Prefix,
    /// Records under the exact host (and port) of `url`, any path.
    Host,
    /// Records under the host of `url` or any of its subdomains.
    Domain,
    /// Records whose `urlkey` falls in `[url, rangeEnd)`.
    Range,
}

impl MatchType {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(MatchType::Default),
            "exact" => Ok(MatchType::Exact),
            "prefix" => Ok(MatchType::Prefix),
            "host" => Ok(MatchType::Host),
            "domain" => Ok(MatchType::Domain),
            "range" => Ok(MatchType::Range),
            other => Err(Error::BadRequest(format!("unknown matchType: {other}"))),
        }
    }
}

/// Resolve `MatchType::Default` against the shape of `url` (§4.4 rule 2): a
/// trailing `*` means `PREFIX` (the `*` is stripped); a leading `*.` means
/// `DOMAIN` (the `*.` is stripped, and a scheme is synthesized if the
/// remainder doesn't carry one, since `host_prefix` needs an absolute URL
/// to parse); anything else is `EXACT`, unchanged.
fn detect_match_type(url: &str) -> (MatchType, String) {
    if let Some(stripped) = url.strip_suffix('*') {
        (MatchType::Prefix, stripped.to_string())
    } else if let Some(stripped) = url.strip_prefix("*.") {
        let url = if stripped.contains("://") {
            stripped.to_string()
        } else {
            format!("http://{stripped}")
        };
        (MatchType::Domain, url)
    } else {
        (MatchType::Exact, url.to_string())
    }
}

/// Order in which matching records are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Ascending `urlkey`, then ascending `timestamp` (the storage order).
    Default,
    /// Ascending `urlkey`, then by absolute distance from `closest`.
    Closest,
    /// Ascending `urlkey`, then descending `timestamp`.
    Reverse,
}

impl SortMode {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(SortMode::Default),
            "closest" => Ok(SortMode::Closest),
            "reverse" => Ok(SortMode::Reverse),
            other => Err(Error::BadRequest(format!("unknown sort mode: {other}"))),
        }
    }
}

/// Serialization of the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Space-delimited CDX text lines.
    Cdx,
    /// A JSON array of arrays (header row first).
    Json,
}

impl OutputFormat {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "cdx" | "text" => Ok(OutputFormat::Cdx),
            "json" => Ok(OutputFormat::Json),
            other => Err(Error::BadRequest(format!("unknown output format: {other}"))),
        }
    }
}

/// Which of a run of records sharing a collapse key is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapseKeep {
    /// Keep the first record of each run (streaming, O(1) memory).
    First,
    /// Keep the last record of each run (one-record lookahead buffer).
    Last,
}

/// Collapse adjacent records sharing the same value of `field`, optionally
/// truncated to `truncate_len` bytes (e.g. `timestamp:8` groups by day).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollapseSpec {
    /// Field name (one of `cdxd_query::serialize::FIELD_NAMES`).
    pub field: String,
    /// Truncate the field's string form to this many bytes before
    /// comparing, if set.
    pub truncate_len: Option<usize>,
    /// Which record of a matching run survives.
    pub keep: CollapseKeep,
}

impl CollapseSpec {
    fn parse(s: &str, keep: CollapseKeep) -> Result<Self> {
        let (field, truncate_len) = match s.split_once(':') {
            Some((field, len)) => {
                let len: usize = len
                    .parse()
                    .map_err(|_| Error::BadRequest(format!("invalid collapse length: {s}")))?;
                (field, Some(len))
            }
            None => (s, None),
        };
        if field.is_empty() {
            return Err(Error::BadRequest("collapse field must not be empty".to_string()));
        }
        Ok(CollapseSpec {
            field: field.to_string(),
            truncate_len,
            keep,
        })
    }
}

/// Fully parsed and validated query parameters.
#[derive(Debug, Clone)]
pub struct QueryParams {
    /// Raw `url` parameter, canonicalized during planning (see
    /// `crate::planner::plan`).
    pub url: String,
    /// How `url` is matched.
    pub match_type: MatchType,
    /// Result ordering.
    pub sort: SortMode,
    /// Required, and used as the reference point, when `sort` is `closest`.
    pub closest: Option<Timestamp>,
    /// Inclusive lower timestamp bound.
    pub from: Option<Timestamp>,
    /// Inclusive upper timestamp bound.
    pub to: Option<Timestamp>,
    /// `[!]field:regex` filters, all of which must pass (AND semantics).
    pub filters: Vec<Filter>,
    /// Optional collapse-adjacent-duplicates spec.
    pub collapse: Option<CollapseSpec>,
    /// Drop 3xx records whose `redirecturl` canonicalizes to the same
    /// `urlkey` as the record itself.
    pub omit_self_redirects: bool,
    /// Maximum records to return, after every other stage.
    pub limit: Option<usize>,
    /// Output serialization.
    pub output: OutputFormat,
    /// Restrict output to these field names, in this order; `None` means
    /// all fields in their default order.
    pub fields: Option<Vec<String>>,
    /// Exclusive upper `urlkey` bound, required when `match_type` is
    /// [`MatchType::Range`].
    pub range_end: Option<String>,
    /// Named access point this query is served through, resolved against
    /// each matching capture's access rules. Defaults to `"access"`.
    pub access_point: String,
}

fn get<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn parse_bool(s: &str) -> bool {
    matches!(s, "true" | "1" | "yes")
}

fn parse_timestamp(s: &str, field: &str) -> Result<Timestamp> {
    s.parse()
        .map_err(|_| Error::BadRequest(format!("invalid {field}: {s}")))
}

/// 14-digit `YYYYMMDDhhmmss` is the canonical width of a timestamp bound.
const TIMESTAMP_WIDTH: usize = 14;

/// Pad a partial `from`/`to` bound out to 14 digits with `pad`, or truncate
/// it down to 14 digits if the caller supplied more (§4.4 rule 3). `from`
/// pads with `'0'` (earliest matching instant); `to` pads with `'9'`
/// (latest matching instant).
fn normalize_bound(s: &str, pad: char, field: &str) -> Result<Timestamp> {
    let mut padded = s.to_string();
    if padded.len() < TIMESTAMP_WIDTH {
        padded.extend(std::iter::repeat(pad).take(TIMESTAMP_WIDTH - padded.len()));
    } else if padded.len() > TIMESTAMP_WIDTH {
        padded.truncate(TIMESTAMP_WIDTH);
    }
    parse_timestamp(&padded, field)
}

/// Parse and validate a query's parameters from `(name, value)` pairs
/// (repeated `filter` entries are all collected; every other key is taken
/// once, first occurrence winning).
pub fn parse_query(params: &[(String, String)]) -> Result<QueryParams> {
    let mut url = get(params, "url")
        .ok_or_else(|| Error::BadRequest("missing required parameter: url".to_string()))?
        .to_string();

    let requested_match_type = match get(params, "matchType") {
        Some(s) => MatchType::parse(s)?,
        None => MatchType::Default,
    };
    let match_type = if requested_match_type == MatchType::Default {
        let (detected, adjusted_url) = detect_match_type(&url);
        url = adjusted_url;
        detected
    } else {
        requested_match_type
    };

    let closest_raw = get(params, "closest");
    let mut sort = match get(params, "sort") {
        Some(s) => SortMode::parse(s)?,
        None => SortMode::Default,
    };
    // `closest=""` is a compatibility shim: a client that asked for
    // `sort=closest` but sent no actual reference timestamp gets the
    // default ordering instead of a hard error (§4.4 rule 4).
    if sort == SortMode::Closest && closest_raw == Some("") {
        sort = SortMode::Default;
    }
    let closest = match closest_raw {
        Some("") | None => None,
        Some(s) => Some(parse_timestamp(s, "closest")?),
    };
    if sort == SortMode::Closest && closest.is_none() {
        return Err(Error::BadRequest(
            "sort=closest requires a closest parameter".to_string(),
        ));
    }
    if sort == SortMode::Closest && match_type != MatchType::Exact {
        return Err(Error::BadRequest("sort=closest requires matchType=exact".to_string()));
    }
    if sort == SortMode::Reverse && match_type != MatchType::Exact {
        return Err(Error::BadRequest("sort=reverse requires matchType=exact".to_string()));
    }

    let from = get(params, "from").map(|s| normalize_bound(s, '0', "from")).transpose()?;
    let to = get(params, "to").map(|s| normalize_bound(s, '9', "to")).transpose()?;
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(Error::BadRequest("from must not be after to".to_string()));
        }
    }
    if (from.is_some() || to.is_some()) && match_type != MatchType::Exact {
        return Err(Error::BadRequest(
            "from/to are only supported with matchType=exact".to_string(),
        ));
    }

    let filters = params
        .iter()
        .filter(|(k, _)| k == "filter")
        .map(|(_, v)| Filter::parse(v))
        .collect::<Result<Vec<_>>>()?;

    let collapse_to_last = get(params, "collapseToLast").map(parse_bool).unwrap_or(false);
    let collapse = get(params, "collapse")
        .map(|s| {
            CollapseSpec::parse(
                s,
                if collapse_to_last {
                    CollapseKeep::Last
                } else {
                    CollapseKeep::First
                },
            )
        })
        .transpose()?;

    let omit_self_redirects = get(params, "omitSelfRedirects").map(parse_bool).unwrap_or(false);

    let limit = get(params, "limit")
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| Error::BadRequest(format!("invalid limit: {s}")))
        })
        .transpose()?;

    let output = match get(params, "output") {
        Some(s) => OutputFormat::parse(s)?,
        None => OutputFormat::Cdx,
    };

    let fields = get(params, "fl").map(|s| s.split(',').map(|f| f.trim().to_string()).collect::<Vec<_>>());

    let range_end = get(params, "rangeEnd").map(|s| s.to_string());
    if match_type == MatchType::Range && range_end.is_none() {
        return Err(Error::BadRequest(
            "matchType=range requires a rangeEnd parameter".to_string(),
        ));
    }

    let access_point = get(params, "accesspoint").unwrap_or("access").to_string();

    Ok(QueryParams {
        url,
        match_type,
        sort,
        closest,
        from,
        to,
        filters,
        collapse,
        omit_self_redirects,
        limit,
        output,
        fields,
        range_end,
        access_point,
    })
}
