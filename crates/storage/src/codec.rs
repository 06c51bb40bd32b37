//! Record Codec (§4.2): packed binary encoding of captures and aliases.
//!
//! Keys are built so lexicographic byte order over the key bytes equals
//! `(urlkey, timestamp, filename, offset)` order component-wise (the
//! byte-order-equivalence guarantee, tested in [`tests::key_order_matches_tuple_order`]).
//! Values carry a one-byte version prefix so future layout changes can be
//! detected rather than silently misread.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use cdxd_core::keyspace::{namespaced, NAMESPACE_ALIAS, NAMESPACE_CAPTURE};
use cdxd_core::{Alias, Capture};
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

/// Current value-layout version written by this codec. Readers accept this
/// version and reject any other with [`CodecError::UnknownVersion`].
pub const CURRENT_VERSION: u8 = 1;

/// Errors raised while encoding or decoding a stored record.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value's version byte is not one this codec understands.
    #[error("unknown record version: {0}")]
    UnknownVersion(u8),
    /// The value bytes were truncated or otherwise malformed.
    #[error("malformed record: {0}")]
    Malformed(String),
    /// The key bytes were truncated or otherwise malformed.
    #[error("malformed key: {0}")]
    MalformedKey(String),
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        CodecError::Malformed(e.to_string())
    }
}

/// Escape `0x00` bytes in a variable-length field so it can be concatenated
/// with other fields in one key while preserving lexicographic order:
/// `0x00` becomes `0x00 0xFF`, and the field is terminated by `0x00 0x00`.
/// Because `0xFF > 0x00`, a field containing more data after an embedded
/// `0x00` sorts after a field that ends there, matching the semantics of the
/// unescaped strings.
fn write_escaped_field(out: &mut Vec<u8>, field: &[u8]) {
    for &b in field {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xFF);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

/// Reverse [`write_escaped_field`], reading one field from `input` starting
/// at `*pos` and advancing `*pos` past its terminator.
fn read_escaped_field(input: &[u8], pos: &mut usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    loop {
        if *pos >= input.len() {
            return Err(CodecError::MalformedKey("unterminated field".into()));
        }
        let b = input[*pos];
        if b == 0x00 {
            match input.get(*pos + 1) {
                Some(0x00) => {
                    *pos += 2;
                    return Ok(out);
                }
                Some(0xFF) => {
                    out.push(0x00);
                    *pos += 2;
                }
                _ => return Err(CodecError::MalformedKey("invalid escape sequence".into())),
            }
        } else {
            out.push(b);
            *pos += 1;
        }
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) -> io::Result<()> {
    out.write_u32::<BigEndian>(s.len() as u32)?;
    out.write_all(s.as_bytes())
}

fn read_string(cur: &mut Cursor<&[u8]>) -> Result<String, CodecError> {
    let len = cur.read_u32::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| CodecError::Malformed(e.to_string()))
}

fn write_option_u64(out: &mut Vec<u8>, v: Option<u64>) -> io::Result<()> {
    match v {
        Some(n) => {
            out.write_u8(1)?;
            out.write_u64::<BigEndian>(n)
        }
        None => out.write_u8(0),
    }
}

fn read_option_u64(cur: &mut Cursor<&[u8]>) -> Result<Option<u64>, CodecError> {
    Ok(if cur.read_u8()? == 1 {
        Some(cur.read_u64::<BigEndian>()?)
    } else {
        None
    })
}

fn write_option_string(out: &mut Vec<u8>, v: &Option<String>) -> io::Result<()> {
    match v {
        Some(s) => {
            out.write_u8(1)?;
            write_string(out, s)
        }
        None => out.write_u8(0),
    }
}

fn read_option_string(cur: &mut Cursor<&[u8]>) -> Result<Option<String>, CodecError> {
    Ok(if cur.read_u8()? == 1 {
        Some(read_string(cur)?)
    } else {
        None
    })
}

/// Build the record key for a capture: `urlkey` + separator + big-endian
/// timestamp + separator + `filename` + big-endian offset, namespaced under
/// [`NAMESPACE_CAPTURE`].
pub fn capture_key(urlkey: &str, timestamp: u64, filename: &str, offset: u64) -> Vec<u8> {
    let mut raw = Vec::new();
    write_escaped_field(&mut raw, urlkey.as_bytes());
    raw.extend_from_slice(&timestamp.to_be_bytes());
    write_escaped_field(&mut raw, filename.as_bytes());
    raw.extend_from_slice(&offset.to_be_bytes());
    namespaced(NAMESPACE_CAPTURE, &raw)
}

/// The namespaced byte prefix every capture key for `urlkey_prefix` begins
/// with, *without* the field terminator — used by the query planner to
/// build PREFIX/HOST/DOMAIN scan bounds. Because escaping only rewrites
/// embedded `0x00` bytes (which SURT keys never contain) and is otherwise
/// the identity map, a byte-prefix of `urlkey_prefix` is exactly a
/// byte-prefix of every matching encoded key.
pub fn capture_urlkey_prefix_bytes(urlkey_prefix: &str) -> Vec<u8> {
    namespaced(NAMESPACE_CAPTURE, urlkey_prefix.as_bytes())
}

/// The lexicographically smallest byte string that is *not* prefixed by
/// `prefix`, used as an exclusive scan upper bound. Strips trailing `0xFF`
/// bytes (which cannot be incremented) before bumping the last remaining
/// byte; a prefix of all `0xFF` bytes has no finite successor and maps to
/// `None`, meaning the scan is unbounded above.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(&last) = out.last() {
        if last == 0xFF {
            out.pop();
        } else {
            *out.last_mut().unwrap() += 1;
            return Some(out);
        }
    }
    None
}

/// Encode a [`Capture`] into its `(key, value)` byte pair.
pub fn encode_capture(c: &Capture) -> (Vec<u8>, Vec<u8>) {
    let key = capture_key(&c.urlkey, c.timestamp, &c.filename, c.offset);
    let mut value = Vec::new();
    value.push(CURRENT_VERSION);
    // Fields not already present in the key, so the key alone need not be
    // re-parsed to reconstruct a Capture.
    write_string(&mut value, &c.original_url).unwrap();
    write_string(&mut value, &c.mimetype).unwrap();
    value.write_u16::<BigEndian>(c.status).unwrap();
    write_string(&mut value, &c.digest).unwrap();
    write_string(&mut value, &c.redirecturl).unwrap();
    write_string(&mut value, &c.robotflags).unwrap();
    value.write_u64::<BigEndian>(c.length).unwrap();
    write_option_u64(&mut value, c.original_length).unwrap();
    write_option_u64(&mut value, c.original_offset).unwrap();
    write_option_string(&mut value, &c.original_filename).unwrap();
    (key, value)
}

/// Decode a `(key, value)` byte pair back into a [`Capture`].
pub fn decode_capture(key: &[u8], value: &[u8]) -> Result<Capture, CodecError> {
    if key.first() != Some(&NAMESPACE_CAPTURE) {
        return Err(CodecError::MalformedKey("not a capture key".into()));
    }
    let body = &key[1..];
    let mut pos = 0usize;
    let urlkey_bytes = read_escaped_field(body, &mut pos)?;
    let urlkey =
        String::from_utf8(urlkey_bytes).map_err(|e| CodecError::MalformedKey(e.to_string()))?;
    if pos + 8 > body.len() {
        return Err(CodecError::MalformedKey("truncated timestamp".into()));
    }
    let timestamp = u64::from_be_bytes(body[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let filename_bytes = read_escaped_field(body, &mut pos)?;
    let filename =
        String::from_utf8(filename_bytes).map_err(|e| CodecError::MalformedKey(e.to_string()))?;
    if pos + 8 > body.len() {
        return Err(CodecError::MalformedKey("truncated offset".into()));
    }
    let offset = u64::from_be_bytes(body[pos..pos + 8].try_into().unwrap());

    let mut cur = Cursor::new(value);
    let version = cur.read_u8()?;
    if version != CURRENT_VERSION {
        return Err(CodecError::UnknownVersion(version));
    }
    let original_url = read_string(&mut cur)?;
    let mimetype = read_string(&mut cur)?;
    let status = cur.read_u16::<BigEndian>()?;
    let digest = read_string(&mut cur)?;
    let redirecturl = read_string(&mut cur)?;
    let robotflags = read_string(&mut cur)?;
    let length = cur.read_u64::<BigEndian>()?;
    let original_length = read_option_u64(&mut cur)?;
    let original_offset = read_option_u64(&mut cur)?;
    let original_filename = read_option_string(&mut cur)?;

    Ok(Capture {
        urlkey,
        timestamp,
        original_url,
        mimetype,
        status,
        digest,
        redirecturl,
        robotflags,
        length,
        offset,
        filename,
        original_length,
        original_offset,
        original_filename,
    })
}

/// Build the record key for an alias, namespaced under [`NAMESPACE_ALIAS`].
pub fn alias_key(alias_surt: &str) -> Vec<u8> {
    namespaced(NAMESPACE_ALIAS, alias_surt.as_bytes())
}

/// Encode an [`Alias`] into its `(key, value)` byte pair.
pub fn encode_alias(a: &Alias) -> (Vec<u8>, Vec<u8>) {
    let key = alias_key(&a.alias_surt);
    let mut value = Vec::new();
    value.push(CURRENT_VERSION);
    write_string(&mut value, &a.target_surt).unwrap();
    (key, value)
}

/// Decode a `(key, value)` byte pair back into an [`Alias`].
pub fn decode_alias(key: &[u8], value: &[u8]) -> Result<Alias, CodecError> {
    if key.first() != Some(&NAMESPACE_ALIAS) {
        return Err(CodecError::MalformedKey("not an alias key".into()));
    }
    let alias_surt = String::from_utf8(key[1..].to_vec())
        .map_err(|e| CodecError::MalformedKey(e.to_string()))?;
    let mut cur = Cursor::new(value);
    let version = cur.read_u8()?;
    if version != CURRENT_VERSION {
        return Err(CodecError::UnknownVersion(version));
    }
    let target_surt = read_string(&mut cur)?;
    Ok(Alias {
        alias_surt,
        target_surt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(urlkey: &str, timestamp: u64, filename: &str, offset: u64) -> Capture {
        Capture {
            urlkey: urlkey.to_string(),
            timestamp,
            original_url: format!("http://example.com{urlkey}"),
            mimetype: "text/html".into(),
            status: 200,
            digest: "sha1:abc".into(),
            redirecturl: "-".into(),
            robotflags: "-".into(),
            length: 1234,
            offset,
            filename: filename.to_string(),
            original_length: None,
            original_offset: None,
            original_filename: None,
        }
    }

    #[test]
    fn round_trip_capture() {
        let c = sample("com,example)/a", 20200101000000, "a.warc.gz", 512);
        let (k, v) = encode_capture(&c);
        let decoded = decode_capture(&k, &v).unwrap();
        assert_eq!(decoded, c);
    }

    #[test]
    fn round_trip_capture_with_cdx14_fields() {
        let mut c = sample("com,example)/a", 20200101000000, "a.warc.gz", 512);
        c.original_length = Some(99);
        c.original_offset = Some(1000);
        c.original_filename = Some("orig.warc".into());
        let (k, v) = encode_capture(&c);
        let decoded = decode_capture(&k, &v).unwrap();
        assert_eq!(decoded, c);
    }

    #[test]
    fn key_order_matches_tuple_order() {
        let pairs = [
            sample("com,example)/a", 1, "f", 0),
            sample("com,example)/a", 2, "f", 0),
            sample("com,example)/a", 2, "f", 1),
            sample("com,example)/b", 1, "f", 0),
        ];
        for w in pairs.windows(2) {
            let (ka, _) = encode_capture(&w[0]);
            let (kb, _) = encode_capture(&w[1]);
            assert!(ka < kb, "{:?} should sort before {:?}", w[0], w[1]);
            assert!(w[0].primary_key() < w[1].primary_key());
        }
    }

    #[test]
    fn urlkey_containing_separator_byte_does_not_alias() {
        // Two different urlkeys, one a byte-prefix of the other with an
        // embedded NUL, must not collide after escaping.
        let a = sample("com,example)/a\u{0}b", 1, "f", 0);
        let b = sample("com,example)/a", 1, "f", 0);
        let (ka, _) = encode_capture(&a);
        let (kb, _) = encode_capture(&b);
        assert_ne!(ka, kb);
        let decoded_a = decode_capture(&ka, &encode_capture(&a).1).unwrap();
        assert_eq!(decoded_a.urlkey, a.urlkey);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let c = sample("com,example)/a", 1, "f", 0);
        let (k, mut v) = encode_capture(&c);
        v[0] = 99;
        let err = decode_capture(&k, &v).unwrap_err();
        assert!(matches!(err, CodecError::UnknownVersion(99)));
    }

    #[test]
    fn round_trip_alias() {
        let a = Alias {
            alias_surt: "com,example,www)/".into(),
            target_surt: "com,example)/".into(),
        };
        let (k, v) = encode_alias(&a);
        let decoded = decode_alias(&k, &v).unwrap();
        assert_eq!(decoded, a);
    }

    #[test]
    fn urlkey_prefix_bytes_are_a_byte_prefix_of_the_full_key() {
        let full = capture_key("com,example)/a", 1, "f", 0);
        let prefix = capture_urlkey_prefix_bytes("com,example)/");
        assert!(full.starts_with(&prefix));
    }

    #[test]
    fn prefix_successor_excludes_prefix_but_includes_extensions() {
        let prefix = capture_urlkey_prefix_bytes("com,example)/a");
        let successor = prefix_successor(&prefix).unwrap();
        let extended = capture_urlkey_prefix_bytes("com,example)/ab");
        assert!(extended < successor);
        assert!(prefix < successor);
    }

    #[test]
    fn prefix_successor_of_all_0xff_is_none() {
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn capture_and_alias_keys_never_collide() {
        let c = sample("com,example)/", 1, "f", 0);
        let a = Alias {
            alias_surt: "com,example)/".into(),
            target_surt: "com,example)/x".into(),
        };
        let (ck, _) = encode_capture(&c);
        let (ak, _) = encode_alias(&a);
        assert_ne!(ck[0], ak[0]);
    }
}
