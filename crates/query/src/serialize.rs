//! Output serialization: CDX text lines and the JSON array-of-arrays form
//! (§4.4, §6.2).

use cdxd_core::Capture;

/// Canonical field order for CDX text lines and the JSON header row.
pub const FIELD_NAMES: &[&str] = &[
    "urlkey",
    "timestamp",
    "original",
    "mimetype",
    "statuscode",
    "digest",
    "redirect",
    "robotflags",
    "length",
    "offset",
    "filename",
];

/// Render one named field of `capture` as a string, or `None` for an
/// unrecognized field name.
pub fn field_value(capture: &Capture, field: &str) -> Option<String> {
    Some(match field {
        "urlkey" => capture.urlkey.clone(),
        "timestamp" => capture.timestamp.to_string(),
        "original" | "original_url" | "url" => capture.original_url.clone(),
        "mimetype" => capture.mimetype.clone(),
        "statuscode" | "status" => capture.status.to_string(),
        "digest" => capture.digest.clone(),
        "redirect" | "redirecturl" => capture.redirecturl.clone(),
        "robotflags" => capture.robotflags.clone(),
        "length" => capture.length.to_string(),
        "offset" => capture.offset.to_string(),
        "filename" => capture.filename.clone(),
        _ => return None,
    })
}

fn fields_for(fields: Option<&[String]>) -> Vec<String> {
    match fields {
        Some(f) => f.to_vec(),
        None => FIELD_NAMES.iter().map(|s| s.to_string()).collect(),
    }
}

/// One space-delimited CDX line per capture, in `fields` order (default:
/// [`FIELD_NAMES`]). Values containing a space are not expected in
/// practice (URLs and digests don't), so no escaping is applied, matching
/// the legacy CDX text format.
pub fn to_cdx_lines(captures: &[Capture], fields: Option<&[String]>) -> String {
    let names = fields_for(fields);
    captures
        .iter()
        .map(|c| {
            names
                .iter()
                .map(|f| field_value(c, f).unwrap_or_else(|| "-".to_string()))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A JSON array of arrays: the field-name header row, then one array of
/// string values per capture, in `fields` order.
pub fn to_json(captures: &[Capture], fields: Option<&[String]>) -> serde_json::Value {
    let names = fields_for(fields);
    let mut rows = Vec::with_capacity(captures.len() + 1);
    rows.push(serde_json::Value::Array(
        names.iter().map(|n| serde_json::Value::String(n.clone())).collect(),
    ));
    for c in captures {
        rows.push(serde_json::Value::Array(
            names
                .iter()
                .map(|f| serde_json::Value::String(field_value(c, f).unwrap_or_else(|| "-".to_string())))
                .collect(),
        ));
    }
    serde_json::Value::Array(rows)
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
    fn cdx_line_has_eleven_space_separated_fields() {
        let line = to_cdx_lines(&[sample()], None);
        assert_eq!(line.split(' ').count(), FIELD_NAMES.len());
    }

    #[test]
    fn custom_field_list_is_honored() {
        let line = to_cdx_lines(&[sample()], Some(&["timestamp".to_string(), "urlkey".to_string()]));
        assert_eq!(line, "20200101000000 (com,example)/");
    }

    #[test]
    fn json_output_has_header_row_then_one_row_per_capture() {
        let value = to_json(&[sample(), sample()], None);
        let arr = value.as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[0][0], "urlkey");
    }
}
