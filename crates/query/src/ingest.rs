//! Ingest line parser (§4.12) and bulk-ingest/bulk-delete orchestration
//! (§3.8, §6.2): the three line shapes a bulk `/collection` POST body may
//! contain, and applying a whole payload as one write batch.

use thiserror::Error;
use tracing::info;

use cdxd_core::surt::{canonicalize, CanonicalizeConfig};
use cdxd_core::{Capture, Error as CoreError, Result as CoreResult, SequenceNumber};
use cdxd_storage::Index;

/// One parsed line of an ingest payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestLine {
    /// A `CDX` format-description header, ignored during ingest.
    Header,
    /// An `@alias <alias-url> <target-url>` line.
    Alias {
        /// The URL being redirected.
        alias_url: String,
        /// The URL it redirects to.
        target_url: String,
    },
    /// A capture record: whitespace-separated CDX tokens, not yet
    /// interpreted field-by-field (done by the caller, which knows which
    /// CDX variant — 9, 10, or 11 field — is in use).
    Record {
        /// Raw whitespace-separated tokens, in file order.
        tokens: Vec<String>,
    },
}

/// Errors raised while parsing one ingest line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestLineError {
    /// An `@alias` line did not have exactly two URLs after the keyword.
    #[error("malformed alias line: {0}")]
    MalformedAlias(String),
    /// A record line had fewer fields than the minimum legacy CDX form.
    #[error("too few fields ({found}, need at least {min}): {0:?}", found = .0.len(), min = 9)]
    TooFewFields(Vec<String>),
}

/// Minimum token count for a legacy (CDX9) record line.
pub const MIN_RECORD_FIELDS: usize = 9;

/// Parse one line of an ingest payload. Blank lines are the caller's
/// concern (this function assumes `line` is non-empty); callers typically
/// skip blank lines before calling.
pub fn parse_cdx_line(line: &str) -> Result<IngestLine, IngestLineError> {
    if line.starts_with(" CDX") || line.starts_with("CDX ") {
        return Ok(IngestLine::Header);
    }
    if let Some(rest) = line.strip_prefix("@alias ") {
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        if tokens.len() != 2 {
            return Err(IngestLineError::MalformedAlias(line.to_string()));
        }
        return Ok(IngestLine::Alias {
            alias_url: tokens[0].to_string(),
            target_url: tokens[1].to_string(),
        });
    }
    let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    if tokens.len() < MIN_RECORD_FIELDS {
        return Err(IngestLineError::TooFewFields(tokens));
    }
    Ok(IngestLine::Record { tokens })
}

/// How a bulk ingest should react to a line it cannot parse or apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadLinesMode {
    /// Abort the whole payload before committing anything; the caller sees
    /// the first bad line's number and reason.
    Error,
    /// Record the bad line in [`IngestOutcome::skipped`] and commit every
    /// other line as one batch.
    Skip,
}

/// One line skipped during a `badLines=skip` ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number within the payload.
    pub line_number: usize,
    /// Why the line was skipped.
    pub reason: String,
}

/// Summary of one bulk ingest or bulk delete (§3.8): how many capture
/// records were staged, how many aliases were installed or removed, and
/// which lines (if any) were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Number of capture records staged into the committed batch.
    pub records_applied: usize,
    /// Number of `@alias` lines staged into the committed batch.
    pub aliases_installed: usize,
    /// Lines skipped under `badLines=skip`, in file order.
    pub skipped: Vec<SkippedLine>,
    /// Sequence number the batch committed under, if anything was applied.
    pub sequence_number: Option<SequenceNumber>,
}

/// CDX9 has no redirect/robotflags columns; CDX11 does. Both share the same
/// leading six and trailing three fields.
///
/// When `recanonicalize` is set, `urlkey` (the first token) is discarded and
/// rederived from the record's `original_url` column instead of trusted
/// verbatim — for payloads produced by a canonicalizer the server no longer
/// agrees with, or hand-written test fixtures.
fn record_to_capture(tokens: &[String], recanonicalize: bool, config: &CanonicalizeConfig) -> CoreResult<Capture> {
    let (redirecturl, robotflags, rest) = match tokens.len() {
        9 => ("-".to_string(), "-".to_string(), &tokens[6..]),
        11 => (tokens[6].clone(), tokens[7].clone(), &tokens[8..]),
        n => {
            return Err(CoreError::BadRequest(format!(
                "unsupported record field count: {n} (expected 9 or 11)"
            )))
        }
    };
    let timestamp: u64 = tokens[1]
        .parse()
        .map_err(|_| CoreError::BadRequest(format!("invalid timestamp: {}", tokens[1])))?;
    let status: u16 = tokens[4].parse().unwrap_or(0);
    let length: u64 = rest[0].parse().unwrap_or(0);
    let offset: u64 = rest[1].parse().unwrap_or(0);
    let urlkey = if recanonicalize {
        canonicalize(&tokens[2], config)?
    } else {
        tokens[0].clone()
    };
    Ok(Capture {
        urlkey,
        timestamp,
        original_url: tokens[2].clone(),
        mimetype: tokens[3].clone(),
        status,
        digest: tokens[5].clone(),
        redirecturl,
        robotflags,
        length,
        offset,
        filename: rest[2].clone(),
        original_length: None,
        original_offset: None,
        original_filename: None,
    })
}

/// Apply a whole ingest payload against `index` as a single write batch
/// (§4.12, §6.2). Blank lines are skipped without affecting line numbering.
/// When `recanonicalize` is `false` (the default), a client-supplied
/// `urlkey` (the first record token) is taken verbatim: ingest trusts the
/// caller to have already run the same canonicalization the server would.
/// When `true`, `urlkey` is rederived from each record's `original_url`.
pub fn bulk_ingest(
    body: &str,
    index: &Index,
    mode: BadLinesMode,
    recanonicalize: bool,
    config: &CanonicalizeConfig,
) -> CoreResult<IngestOutcome> {
    let mut outcome = IngestOutcome::default();
    let mut batch = index.begin_update();

    for (idx, raw_line) in body.lines().enumerate() {
        let line_number = idx + 1;
        let line = raw_line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }

        let parsed = match parse_cdx_line(line) {
            Ok(p) => p,
            Err(e) => {
                if mode == BadLinesMode::Error {
                    return Err(CoreError::BadRequest(format!("line {line_number}: {e}")));
                }
                outcome.skipped.push(SkippedLine {
                    line_number,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match parsed {
            IngestLine::Header => {}
            IngestLine::Alias { alias_url, target_url } => {
                let alias_surt = canonicalize(&alias_url, config);
                let target_surt = canonicalize(&target_url, config);
                match (alias_surt, target_surt) {
                    (Ok(alias_surt), Ok(target_surt)) => {
                        batch.put_alias(&cdxd_core::Alias { alias_surt, target_surt });
                        outcome.aliases_installed += 1;
                    }
                    (alias_result, target_result) => {
                        let reason = alias_result.err().or(target_result.err()).map(|e| e.to_string()).unwrap_or_default();
                        if mode == BadLinesMode::Error {
                            return Err(CoreError::BadRequest(format!("line {line_number}: {reason}")));
                        }
                        outcome.skipped.push(SkippedLine { line_number, reason });
                    }
                }
            }
            IngestLine::Record { tokens } => match record_to_capture(&tokens, recanonicalize, config) {
                Ok(capture) => {
                    batch.put_capture(&capture);
                    outcome.records_applied += 1;
                }
                Err(e) => {
                    if mode == BadLinesMode::Error {
                        return Err(CoreError::BadRequest(format!("line {line_number}: {e}")));
                    }
                    outcome.skipped.push(SkippedLine {
                        line_number,
                        reason: e.to_string(),
                    });
                }
            },
        }
    }

    if !batch.is_empty() {
        let seq = index.commit(batch)?;
        outcome.sequence_number = Some(seq);
        info!(
            records = outcome.records_applied,
            aliases = outcome.aliases_installed,
            skipped = outcome.skipped.len(),
            sequence_number = seq,
            "bulk ingest committed"
        );
    }

    Ok(outcome)
}

/// Remove every capture and alias named by a payload in the same line
/// formats `bulk_ingest` accepts (§3.8), as a single write batch. A record
/// line's `urlkey`/`timestamp`/`filename`/`offset` identify the exact
/// capture to delete; an `@alias` line removes the alias keyed by its first
/// URL, regardless of what its second URL resolves to. `recanonicalize`
/// controls how a record line's `urlkey` is derived, exactly as in
/// `bulk_ingest`, so a delete payload can be produced the same way an
/// ingest payload is.
pub fn bulk_delete(
    body: &str,
    index: &Index,
    recanonicalize: bool,
    config: &CanonicalizeConfig,
) -> CoreResult<IngestOutcome> {
    let mut outcome = IngestOutcome::default();
    let mut batch = index.begin_update();

    for (idx, raw_line) in body.lines().enumerate() {
        let line_number = idx + 1;
        let line = raw_line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }

        let parsed = match parse_cdx_line(line) {
            Ok(p) => p,
            Err(e) => {
                outcome.skipped.push(SkippedLine {
                    line_number,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match parsed {
            IngestLine::Header => {}
            IngestLine::Alias { alias_url, .. } => match canonicalize(&alias_url, config) {
                Ok(alias_surt) => {
                    batch.delete_alias(&alias_surt);
                    outcome.aliases_installed += 1;
                }
                Err(e) => outcome.skipped.push(SkippedLine {
                    line_number,
                    reason: e.to_string(),
                }),
            },
            IngestLine::Record { tokens } => match record_to_capture(&tokens, recanonicalize, config) {
                Ok(capture) => {
                    batch.delete_capture(&capture.urlkey, capture.timestamp, &capture.filename, capture.offset);
                    outcome.records_applied += 1;
                }
                Err(e) => outcome.skipped.push(SkippedLine {
                    line_number,
                    reason: e.to_string(),
                }),
            },
        }
    }

    if !batch.is_empty() {
        let seq = index.commit(batch)?;
        outcome.sequence_number = Some(seq);
        info!(
            records = outcome.records_applied,
            aliases = outcome.aliases_installed,
            skipped = outcome.skipped.len(),
            sequence_number = seq,
            "bulk delete committed"
        );
    }

    Ok(outcome)
}
