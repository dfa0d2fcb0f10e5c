//! Golden wire vectors for the canonical message encoding.
//!
//! These pin the exact bytes a message produces on the wire, so an
//! implementation in any language can check itself against them.

use parley_core::{Message, MessageId};

/// A golden encoding vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Message id.
    pub id: u64,
    /// Millisecond timestamp.
    pub timestamp: i64,
    /// State counter at creation.
    pub state_at: u64,
    /// Payload bytes.
    pub payload: &'static [u8],
    /// Expected canonical encoding (hex).
    pub expected_hex: &'static str,
}

impl GoldenVector {
    /// Build the message this vector describes.
    pub fn message(&self) -> Message {
        Message {
            id: MessageId(self.id),
            timestamp: self.timestamp,
            state_at: self.state_at,
            payload: self.payload.to_vec().into(),
        }
    }
}

/// All golden encoding vectors.
///
/// The encoding is a CBOR map with integer keys 0 (id), 1 (timestamp),
/// 2 (state_at), 3 (payload), ascending, with minimal-length integers.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "all-zero message with empty payload",
            id: 1,
            timestamp: 0,
            state_at: 0,
            payload: b"",
            expected_hex: "a40001010002000340",
        },
        GoldenVector {
            name: "small fields and a two-byte payload",
            id: 255,
            timestamp: 256,
            state_at: 1000,
            payload: b"hi",
            expected_hex: "a40018ff01190100021903e803426869",
        },
        GoldenVector {
            name: "negative timestamp, saturated state",
            id: 0,
            timestamp: -1,
            state_at: u64::MAX,
            payload: &[0x00],
            expected_hex: "a400000120021bffffffffffffffff034100",
        },
    ]
}

/// Check every vector both ways: encode to the pinned bytes and decode
/// back to the original message.
pub fn verify_all_vectors() -> anyhow::Result<()> {
    for vector in all_vectors() {
        let msg = vector.message();
        let encoded = hex::encode(msg.encode());
        anyhow::ensure!(
            encoded == vector.expected_hex,
            "vector {:?}: encoded {} want {}",
            vector.name,
            encoded,
            vector.expected_hex
        );

        let raw = hex::decode(vector.expected_hex)?;
        let decoded = Message::decode(&raw)?;
        anyhow::ensure!(
            decoded == msg,
            "vector {:?}: decode mismatch {:?}",
            vector.name,
            decoded
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_verify() {
        verify_all_vectors().unwrap();
    }
}
