//! Canonical CBOR encoding for deterministic hashing and signing.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 milliseconds)
//!
//! Every node must derive the same CID from the same payload, so these bytes
//! never depend on struct layout or serializer defaults.

use ciborium::value::Value;

use crate::post::PostPayload;
use crate::vote::{Report, Vote};

/// Domain tag hashed in front of a post payload to form its CID.
pub const CID_DOMAIN: &[u8] = b"iceberg/post-cid/v1:";
/// Domain tag for the author's signature over a post payload.
pub const POST_SIGN_DOMAIN: &[u8] = b"iceberg/post-sig/v1:";
/// Domain tag for a voter's signature.
pub const VOTE_SIGN_DOMAIN: &[u8] = b"iceberg/vote-sig/v1:";
/// Domain tag for a reporter's signature.
pub const REPORT_SIGN_DOMAIN: &[u8] = b"iceberg/report-sig/v1:";
/// Domain tag for the (voter, target) uniqueness key.
pub const VOTE_KEY_DOMAIN: &[u8] = b"iceberg/vote-key/v1:";
/// Domain tag for the (reporter, target) uniqueness key.
pub const REPORT_KEY_DOMAIN: &[u8] = b"iceberg/report-key/v1:";

/// Field keys. Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const AUTHOR: u64 = 0;
    pub const TITLE: u64 = 1;
    pub const BODY: u64 = 2;
    pub const REGION: u64 = 3;
    pub const CREATED_AT: u64 = 4;

    pub const ACTOR: u64 = 0;
    pub const TARGET: u64 = 1;
    pub const DIRECTION: u64 = 2;
    pub const VOTER_REGION: u64 = 3;
    pub const TIMESTAMP: u64 = 4;
    pub const REASON: u64 = 5;
}

/// Encode a post payload to canonical CBOR bytes.
pub fn post_payload_bytes(payload: &PostPayload) -> Vec<u8> {
    let value = Value::Map(vec![
        entry(keys::AUTHOR, Value::Bytes(payload.author.0.to_vec())),
        entry(keys::TITLE, Value::Text(payload.title.clone())),
        entry(keys::BODY, Value::Text(payload.body.clone())),
        entry(keys::REGION, Value::Text(payload.region.to_string())),
        entry(keys::CREATED_AT, Value::Integer(payload.created_at.into())),
    ]);
    encode_cbor_value_canonical(&value)
}

/// Encode the signed body of a vote (everything except the signature).
pub fn vote_body_bytes(vote: &Vote) -> Vec<u8> {
    let value = Value::Map(vec![
        entry(keys::ACTOR, Value::Bytes(vote.voter.0.to_vec())),
        entry(keys::TARGET, Value::Bytes(vote.target.0.to_vec())),
        entry(
            keys::DIRECTION,
            Value::Integer(vote.direction.as_i8().into()),
        ),
        entry(keys::VOTER_REGION, Value::Text(vote.region.to_string())),
        entry(keys::TIMESTAMP, Value::Integer(vote.timestamp.into())),
    ]);
    encode_cbor_value_canonical(&value)
}

/// Encode the signed body of a report (everything except the signature).
pub fn report_body_bytes(report: &Report) -> Vec<u8> {
    let value = Value::Map(vec![
        entry(keys::ACTOR, Value::Bytes(report.reporter.0.to_vec())),
        entry(keys::TARGET, Value::Bytes(report.target.0.to_vec())),
        entry(keys::TIMESTAMP, Value::Integer(report.timestamp.into())),
        entry(keys::REASON, Value::Text(report.reason.clone())),
    ]);
    encode_cbor_value_canonical(&value)
}

/// Prefix `body` with a domain tag.
pub fn domain_message(domain: &[u8], body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(domain.len() + body.len());
    buf.extend_from_slice(domain);
    buf.extend_from_slice(body);
    buf
}

fn entry(key: u64, value: Value) -> (Value, Value) {
    (Value::Integer(key.into()), value)
}

/// Encode a CBOR Value to canonical bytes.
fn encode_cbor_value_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item);
            }
        }
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        other => unreachable!("canonical payloads never contain {other:?}"),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a map with keys sorted by their encoded bytes.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| (encode_cbor_value_canonical(k), v))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::region::Region;

    fn payload() -> PostPayload {
        PostPayload {
            author: Keypair::from_seed(&[0x42; 32]).identity(),
            title: "Ponte quebrada".into(),
            body: "A ponte da rua 7 caiu.".into(),
            region: Region::new("BR-SP").unwrap(),
            created_at: 1_736_870_400_000,
        }
    }

    #[test]
    fn test_post_encoding_deterministic() {
        assert_eq!(post_payload_bytes(&payload()), post_payload_bytes(&payload()));
    }

    #[test]
    fn test_post_encoding_field_sensitive() {
        let base = post_payload_bytes(&payload());
        let mut p = payload();
        p.created_at += 1;
        assert_ne!(post_payload_bytes(&p), base);
        let mut p = payload();
        p.region = Region::new("BR-RJ").unwrap();
        assert_ne!(post_payload_bytes(&p), base);
    }

    #[test]
    fn test_integer_encoding() {
        let cases: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (23, &[0x17]),
            (24, &[0x18, 24]),
            (255, &[0x18, 255]),
            (256, &[0x19, 0x01, 0x00]),
            (65535, &[0x19, 0xff, 0xff]),
            (65536, &[0x1a, 0x00, 0x01, 0x00, 0x00]),
        ];
        for (n, expected) in cases {
            let mut buf = Vec::new();
            encode_uint(&mut buf, 0, *n);
            assert_eq!(&buf, expected, "{n}");
        }
    }

    #[test]
    fn test_negative_integer_encoding() {
        let mut buf = Vec::new();
        encode_integer(&mut buf, (-1i64).into());
        assert_eq!(buf, vec![0x20]);
    }

    #[test]
    fn test_map_key_ordering() {
        let mut buf = Vec::new();
        let entries = vec![
            (Value::Integer(8.into()), Value::Integer(80.into())),
            (Value::Integer(0.into()), Value::Integer(0.into())),
            (Value::Integer(5.into()), Value::Integer(50.into())),
        ];
        encode_map_canonical(&mut buf, &entries);
        assert_eq!(buf, vec![0xa3, 0x00, 0x00, 0x05, 0x18, 50, 0x08, 0x18, 80]);
    }

    #[test]
    fn test_canonical_matches_ciborium_decoding() {
        let bytes = post_payload_bytes(&payload());
        let value: Value = ciborium::from_reader(bytes.as_slice()).unwrap();
        match value {
            Value::Map(entries) => assert_eq!(entries.len(), 5),
            other => panic!("expected map, got {other:?}"),
        }
    }
}
