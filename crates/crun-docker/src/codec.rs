//! JSON codec over the wire-format models.
//!
//! Unary bodies are encoded/decoded whole; streaming endpoints deliver
//! newline-delimited JSON which [`NdJsonDecoder`] reassembles across
//! arbitrary chunk boundaries.

use crate::error::CodecError;
use bytes::{Bytes, BytesMut};
use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, CodecError> {
    let raw = serde_json::to_vec(value)
        .map_err(|e| CodecError::SchemaMismatch(e.to_string()))?;
    Ok(Bytes::from(raw))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| {
        if e.is_eof() {
            CodecError::Truncated
        } else {
            CodecError::SchemaMismatch(e.to_string())
        }
    })
}

/// Parse a daemon timestamp (RFC3339, optionally fractional) into epoch
/// nanoseconds. The daemon's textual precision varies; the parsed
/// representation does not.
pub fn parse_timestamp(s: &str) -> Result<i64, CodecError> {
    let parsed = DateTime::parse_from_rfc3339(s)
        .map_err(|e| CodecError::SchemaMismatch(format!("bad timestamp {:?}: {}", s, e)))?;
    parsed
        .timestamp_nanos_opt()
        .ok_or_else(|| CodecError::SchemaMismatch(format!("timestamp out of range: {:?}", s)))
}

/// The zero value the daemon uses for "never" (`0001-01-01T00:00:00Z`).
pub fn is_zero_timestamp(s: &str) -> bool {
    s.is_empty() || s.starts_with("0001-01-01")
}

/// Incremental decoder for newline-delimited JSON streams.
///
/// Feed raw chunks as they arrive, drain complete values with
/// [`next_value`](Self::next_value), and call [`finish`](Self::finish)
/// once the stream ends to detect a truncated trailing line.
#[derive(Debug, Default)]
pub struct NdJsonDecoder {
    buf: BytesMut,
}

impl NdJsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete value, or `None` when more input is needed.
    pub fn next_value<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let line = self.buf.split_to(pos + 1);
            let line = &line[..line.len() - 1];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let value = serde_json::from_slice(line)
                .map_err(|e| CodecError::SchemaMismatch(e.to_string()))?;
            return Ok(Some(value));
        }
    }

    /// Verify nothing but whitespace is left once the stream has ended.
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.buf.iter().all(u8::is_ascii_whitespace) {
            Ok(())
        } else {
            Err(CodecError::Truncated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u64,
    }

    #[test]
    fn decode_maps_eof_to_truncated() {
        let err = decode::<Item>(br#"{"id":"#).unwrap_err();
        assert_eq!(err, CodecError::Truncated);
    }

    #[test]
    fn decode_maps_type_error_to_schema_mismatch() {
        let err = decode::<Item>(br#"{"id":"nope"}"#).unwrap_err();
        assert!(matches!(err, CodecError::SchemaMismatch(_)));
    }

    #[test]
    fn ndjson_across_chunk_boundaries() {
        let mut decoder = NdJsonDecoder::new();
        decoder.feed(br#"{"id":1}"#);
        assert_eq!(decoder.next_value::<Item>().unwrap(), None);
        decoder.feed(b"\n{\"id\":");
        assert_eq!(decoder.next_value::<Item>().unwrap(), Some(Item { id: 1 }));
        assert_eq!(decoder.next_value::<Item>().unwrap(), None);
        decoder.feed(b"2}\r\n");
        assert_eq!(decoder.next_value::<Item>().unwrap(), Some(Item { id: 2 }));
        decoder.finish().unwrap();
    }

    #[test]
    fn ndjson_skips_blank_lines() {
        let mut decoder = NdJsonDecoder::new();
        decoder.feed(b"\n\r\n{\"id\":7}\n");
        assert_eq!(decoder.next_value::<Item>().unwrap(), Some(Item { id: 7 }));
    }

    #[test]
    fn finish_flags_partial_trailing_line() {
        let mut decoder = NdJsonDecoder::new();
        decoder.feed(br#"{"id":1}"#);
        assert_eq!(decoder.finish().unwrap_err(), CodecError::Truncated);
    }

    #[test]
    fn timestamps_normalize_to_epoch_nanos() {
        assert_eq!(parse_timestamp("1970-01-01T00:00:01Z").unwrap(), 1_000_000_000);
        assert_eq!(
            parse_timestamp("1970-01-01T00:00:00.000000123Z").unwrap(),
            123
        );
        // Offset forms normalize to the same instant.
        assert_eq!(
            parse_timestamp("1970-01-01T01:00:00+01:00").unwrap(),
            0
        );
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn zero_timestamp_detection() {
        assert!(is_zero_timestamp("0001-01-01T00:00:00Z"));
        assert!(!is_zero_timestamp("2024-05-01T10:00:00Z"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Decoding is invariant under how the byte stream is cut
            /// into chunks.
            #[test]
            fn ndjson_decode_ignores_chunk_boundaries(
                ids in prop::collection::vec(0u64..10_000, 1..20),
                cut in 1usize..64,
            ) {
                let raw: Vec<u8> = ids
                    .iter()
                    .flat_map(|id| format!("{{\"id\":{}}}\n", id).into_bytes())
                    .collect();

                let mut decoder = NdJsonDecoder::new();
                let mut decoded = Vec::new();
                for chunk in raw.chunks(cut) {
                    decoder.feed(chunk);
                    while let Some(item) = decoder.next_value::<Item>().unwrap() {
                        decoded.push(item.id);
                    }
                }
                decoder.finish().unwrap();
                prop_assert_eq!(decoded, ids);
            }
        }
    }
}
