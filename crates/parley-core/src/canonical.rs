//! Canonical CBOR encoding for messages.
//!
//! This module implements the RFC 8949 Core Deterministic Encoding subset
//! we need:
//! - Integer map keys in ascending order
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 milliseconds)
//!
//! Determinism matters: a message is re-encoded when it moves between disk
//! and wire, and repeated encode/decode cycles must yield byte-identical
//! output. No encoder state leaks into the bytes.

use ciborium::value::Value;

use crate::error::{CoreError, Result};
use crate::message::{Message, MessageId};

/// Message field keys.
///
/// Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const ID: u64 = 0;
    pub const TIMESTAMP: u64 = 1;
    pub const STATE_AT: u64 = 2;
    pub const PAYLOAD: u64 = 3;
}

/// Encode a message to canonical CBOR bytes.
pub fn encode_message(msg: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + msg.payload.len());
    let entries = [
        (keys::ID, FieldValue::U64(msg.id.as_u64())),
        (keys::TIMESTAMP, FieldValue::I64(msg.timestamp)),
        (keys::STATE_AT, FieldValue::U64(msg.state_at)),
        (keys::PAYLOAD, FieldValue::Bytes(&msg.payload)),
    ];

    encode_uint(&mut buf, 5, entries.len() as u64);
    for (key, value) in entries {
        encode_uint(&mut buf, 0, key);
        match value {
            FieldValue::U64(n) => encode_uint(&mut buf, 0, n),
            FieldValue::I64(n) => encode_int(&mut buf, n),
            FieldValue::Bytes(b) => encode_bytes(&mut buf, b),
        }
    }
    buf
}

enum FieldValue<'a> {
    U64(u64),
    I64(i64),
    Bytes(&'a [u8]),
}

/// Encode a signed integer (major types 0 and 1).
fn encode_int(buf: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type, minimal width.
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

/// Encode a byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Decode a message from CBOR bytes.
///
/// Accepts any valid CBOR ordering of the four integer keys; the message
/// re-encodes canonically regardless of how it arrived.
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| CoreError::Decoding(e.to_string()))?;

    let entries = match value {
        Value::Map(entries) => entries,
        _ => return Err(CoreError::Malformed("expected a CBOR map".into())),
    };

    let mut id: Option<u64> = None;
    let mut timestamp: Option<i64> = None;
    let mut state_at: Option<u64> = None;
    let mut payload: Option<Vec<u8>> = None;

    for (key, value) in entries {
        let key = integer_key(&key)?;
        match key {
            keys::ID => id = Some(as_u64(&value, "id")?),
            keys::TIMESTAMP => timestamp = Some(as_i64(&value, "timestamp")?),
            keys::STATE_AT => state_at = Some(as_u64(&value, "state_at")?),
            keys::PAYLOAD => match value {
                Value::Bytes(b) => payload = Some(b),
                _ => return Err(CoreError::Malformed("payload must be bytes".into())),
            },
            other => {
                return Err(CoreError::Malformed(format!("unknown field key {other}")));
            }
        }
    }

    Ok(Message {
        id: MessageId(id.ok_or_else(|| missing("id"))?),
        timestamp: timestamp.ok_or_else(|| missing("timestamp"))?,
        state_at: state_at.ok_or_else(|| missing("state_at"))?,
        payload: payload.ok_or_else(|| missing("payload"))?.into(),
    })
}

fn missing(field: &str) -> CoreError {
    CoreError::Malformed(format!("missing field: {field}"))
}

fn integer_key(key: &Value) -> Result<u64> {
    match key {
        Value::Integer(i) => {
            let n: i128 = (*i).into();
            u64::try_from(n).map_err(|_| CoreError::Malformed("negative map key".into()))
        }
        _ => Err(CoreError::Malformed("non-integer map key".into())),
    }
}

fn as_u64(value: &Value, field: &str) -> Result<u64> {
    match value {
        Value::Integer(i) => {
            let n: i128 = (*i).into();
            u64::try_from(n)
                .map_err(|_| CoreError::Malformed(format!("{field} out of range")))
        }
        _ => Err(CoreError::Malformed(format!("{field} must be an integer"))),
    }
}

fn as_i64(value: &Value, field: &str) -> Result<i64> {
    match value {
        Value::Integer(i) => {
            let n: i128 = (*i).into();
            i64::try_from(n)
                .map_err(|_| CoreError::Malformed(format!("{field} out of range")))
        }
        _ => Err(CoreError::Malformed(format!("{field} must be an integer"))),
    }
}
