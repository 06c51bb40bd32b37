//! Filter grammar: `[!]<field>:<regex>` (§4.4).
//!
//! Every filter must match for a record to survive; a leading `!` negates
//! that one filter's sense.

use regex::Regex;

use cdxd_core::{Capture, Error, Result};

use crate::serialize::field_value;

/// One parsed `[!]field:regex` filter.
#[derive(Debug, Clone)]
pub struct Filter {
    field: String,
    regex: Regex,
    negate: bool,
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.negate == other.negate && self.regex.as_str() == other.regex.as_str()
    }
}

impl Filter {
    /// Parse one filter expression.
    pub fn parse(s: &str) -> Result<Self> {
        let (negate, rest) = match s.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (field, pattern) = rest
            .split_once(':')
            .ok_or_else(|| Error::BadRequest(format!("malformed filter (expected field:regex): {s}")))?;
        if field.is_empty() {
            return Err(Error::BadRequest(format!("filter field must not be empty: {s}")));
        }
        let regex = Regex::new(pattern).map_err(|e| Error::BadRequest(format!("invalid filter regex: {e}")))?;
        Ok(Filter {
            field: field.to_string(),
            regex,
            negate,
        })
    }

    /// Whether `capture` passes this filter.
    pub fn matches(&self, capture: &Capture) -> bool {
        let value = field_value(capture, &self.field);
        let is_match = value.is_some_and(|v| self.regex.is_match(&v));
        is_match != self.negate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Capture {
        Capture {
            urlkey: "(com,example)/".into(),
            timestamp: 20200101000000,
            original_url: "http://example.com/".into(),
            mimetype: "text/html".into(),
            status: 200,
            digest: "abc".into(),
            redirecturl: "-".into(),
            robotflags: "-".into(),
            length: 10,
            offset: 0,
            filename: "a.warc".into(),
            original_length: None,
            original_offset: None,
            original_filename: None,
        }
    }

    #[test]
    fn positive_filter_matches() {
        let f = Filter::parse("status:200").unwrap();
        assert!(f.matches(&sample()));
    }

    #[test]
    fn negated_filter_excludes_matches() {
        let f = Filter::parse("!status:200").unwrap();
        assert!(!f.matches(&sample()));
    }

    #[test]
    fn non_matching_regex_fails() {
        let f = Filter::parse("mimetype:image/.*").unwrap();
        assert!(!f.matches(&sample()));
    }

    #[test]
    fn missing_colon_is_rejected() {
        assert!(Filter::parse("status200").is_err());
    }

    #[test]
    fn empty_field_is_rejected() {
        assert!(Filter::parse(":200").is_err());
    }
}
