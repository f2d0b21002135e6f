//! Resilient decoding of service-registration documents
//!
//! Operators have written the documents under the watched prefix in at
//! least four shapes over the years, and all of them must keep working:
//!
//! 1. an object with a `services` field holding an array,
//! 2. a bare array of registration objects,
//! 3. back-to-back registration objects with no separator
//!    (concatenated-JSON framing),
//! 4. the same, with stray commas between (or dangling after) the objects.
//!
//! The attempts run in that order and the first success wins. Decoding is
//! partial-success: a malformed fragment never invalidates records already
//! decoded from the same value; it is reported alongside them instead.

pub mod putback;

pub use putback::PutBackReader;

use serde::Deserialize;
use std::io::{Cursor, Read};
use thiserror::Error;

use crate::models::ServiceRegistration;

/// Aggregated decode failure for one KV entry.
///
/// Carries the undecodable fragments; the registrations decoded before the
/// failure are still returned by [`decode_registrations`].
#[derive(Debug, Clone, Error)]
#[error("{} undecodable fragment(s): {}", .fragments.len(), .fragments.join("; "))]
pub struct DecodeError {
    pub fragments: Vec<String>,
}

/// Result of decoding one KV entry's value bytes.
#[derive(Debug)]
pub struct Decoded {
    /// Registrations in document order
    pub registrations: Vec<ServiceRegistration>,

    /// Aggregated error for the undecodable tail, if any
    pub error: Option<DecodeError>,
}

/// Wrapper document shape: `{"services": [...]}`.
///
/// The field is required so that a lone registration object falls through
/// to the concatenated-stream path instead of decoding to nothing.
#[derive(Deserialize)]
struct ServiceDocument {
    #[serde(rename = "services", alias = "Services")]
    services: Vec<ServiceRegistration>,
}

/// Decode one KV entry's value into an ordered list of registrations.
///
/// Empty input yields an empty list and no error.
pub fn decode_registrations(value: &[u8]) -> Decoded {
    if let Ok(doc) = serde_json::from_slice::<ServiceDocument>(value) {
        return Decoded {
            registrations: doc.services,
            error: None,
        };
    }

    if let Ok(regs) = serde_json::from_slice::<Vec<ServiceRegistration>>(value) {
        return Decoded {
            registrations: regs,
            error: None,
        };
    }

    decode_concatenated(value)
}

/// Decode a stream of back-to-back objects, splicing out stray separator
/// commas through the put-back reader.
///
/// On a real decode failure the remaining fragment is recorded and decoding
/// stops; everything decoded so far is kept.
fn decode_concatenated(value: &[u8]) -> Decoded {
    let mut registrations = Vec::new();
    let mut fragments = Vec::new();
    let mut reader = PutBackReader::new(Cursor::new(value));

    loop {
        match skip_separators(&mut reader) {
            // End of input with nothing left to read is success, which also
            // swallows a dangling trailing comma.
            Ok(false) => break,
            Ok(true) => {}
            Err(err) => {
                fragments.push(format!("read failed: {err}"));
                break;
            }
        }

        let mut de = serde_json::Deserializer::from_reader(&mut reader);
        match ServiceRegistration::deserialize(&mut de) {
            Ok(reg) => registrations.push(reg),
            Err(err) => {
                drop(de);
                fragments.push(describe_failure(&mut reader, &err));
                break;
            }
        }
    }

    let error = if fragments.is_empty() {
        None
    } else {
        Some(DecodeError { fragments })
    };

    Decoded {
        registrations,
        error,
    }
}

/// Skip whitespace and stray separator commas, putting the first
/// significant byte back for the deserializer. Returns false at end of
/// input.
fn skip_separators<R: Read>(reader: &mut PutBackReader<R>) -> std::io::Result<bool> {
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte)? == 0 {
            return Ok(false);
        }
        match byte[0] {
            b' ' | b'\t' | b'\n' | b'\r' | b',' => continue,
            _ => {
                reader.set_back(byte.to_vec());
                return Ok(true);
            }
        }
    }
}

/// Render the unread remainder of the stream for the error report.
fn describe_failure<R: Read>(reader: &mut PutBackReader<R>, err: &serde_json::Error) -> String {
    let mut rest = Vec::new();
    let _ = reader.read_to_end(&mut rest);
    let shown = String::from_utf8_lossy(&rest[..rest.len().min(80)]);
    format!("bad read ({err}): {shown}")
}

#[cfg(test)]
mod tests {
    use super::*;

    // Five registrations, comma-separated but not wrapped in an array.
    fn comma_serial() -> String {
        (1..=5)
            .map(|i| {
                format!(
                    r#"{{
    "id": "cb{i:02}.example.net",
    "name": "couchbase",
    "tags": ["cache", "cluster-a"],
    "address": "cb{i:02}.example.net",
    "port": 8091,
    "checks": [
        {{"http": "http://cb{i:02}.example.net:8091/pools/", "interval": "30s"}}
    ]
}}"#
                )
            })
            .collect::<Vec<_>>()
            .join(",\n")
    }

    fn assert_five(regs: &[ServiceRegistration]) {
        assert_eq!(regs.len(), 5);
        assert_eq!(regs[0].address, "cb01.example.net");
        assert_eq!(regs[4].name, "couchbase");
    }

    #[test]
    fn test_all_encodings_decode_identically() {
        let serial = comma_serial();
        let cases: Vec<(&str, String)> = vec![
            ("comma serial", serial.clone()),
            ("serial trailing comma", format!("{serial},")),
            ("list", format!("[{serial}]")),
            ("json object", format!("{{\"services\": [{serial}]}}")),
            ("no comma serial", serial.replace("},\n{", "}\n{")),
        ];

        for (desc, payload) in cases {
            let decoded = decode_registrations(payload.as_bytes());
            assert!(decoded.error.is_none(), "unexpected error in pass {desc}");
            assert_five(&decoded.registrations);
        }
    }

    #[test]
    fn test_pascal_case_wrapper_field() {
        let payload = format!("{{\"Services\": [{}]}}", comma_serial());
        let decoded = decode_registrations(payload.as_bytes());
        assert!(decoded.error.is_none());
        assert_five(&decoded.registrations);
    }

    #[test]
    fn test_empty_value_is_empty_and_clean() {
        let decoded = decode_registrations(b"");
        assert!(decoded.registrations.is_empty());
        assert!(decoded.error.is_none());
    }

    #[test]
    fn test_whitespace_only_is_empty_and_clean() {
        let decoded = decode_registrations(b"  \n\t ");
        assert!(decoded.registrations.is_empty());
        assert!(decoded.error.is_none());
    }

    #[test]
    fn test_single_bare_object_decodes_as_one() {
        let payload = r#"{"name": "solo", "address": "10.0.0.1", "port": 80}"#;
        let decoded = decode_registrations(payload.as_bytes());
        assert!(decoded.error.is_none());
        assert_eq!(decoded.registrations.len(), 1);
        assert_eq!(decoded.registrations[0].name, "solo");
    }

    #[test]
    fn test_multiple_stray_commas_between_objects() {
        let payload = r#"{"name": "a"} ,, {"name": "b"}"#;
        let decoded = decode_registrations(payload.as_bytes());
        assert!(decoded.error.is_none());
        assert_eq!(decoded.registrations.len(), 2);
        assert_eq!(decoded.registrations[1].name, "b");
    }

    #[test]
    fn test_dangling_comma_is_silent() {
        let payload = r#"{"name": "a"},"#;
        let decoded = decode_registrations(payload.as_bytes());
        assert!(decoded.error.is_none());
        assert_eq!(decoded.registrations.len(), 1);
    }

    #[test]
    fn test_garbage_tail_keeps_decoded_prefix() {
        let payload = r#"{"name": "a"} ] not json"#;
        let decoded = decode_registrations(payload.as_bytes());
        assert_eq!(decoded.registrations.len(), 1);
        assert_eq!(decoded.registrations[0].name, "a");
        let err = decoded.error.expect("tail must be reported");
        assert_eq!(err.fragments.len(), 1);
    }

    #[test]
    fn test_truncated_object_reports_error() {
        let payload = r#"{"name": "a"} {"name": "b"#;
        let decoded = decode_registrations(payload.as_bytes());
        assert_eq!(decoded.registrations.len(), 1);
        assert!(decoded.error.is_some());
    }

    #[test]
    fn test_leading_comma_is_recovered() {
        let payload = r#",{"name": "a"}"#;
        let decoded = decode_registrations(payload.as_bytes());
        assert!(decoded.error.is_none());
        assert_eq!(decoded.registrations.len(), 1);
    }

    #[test]
    fn test_empty_wrapper_object() {
        let decoded = decode_registrations(br#"{"services": []}"#);
        assert!(decoded.error.is_none());
        assert!(decoded.registrations.is_empty());
    }
}
