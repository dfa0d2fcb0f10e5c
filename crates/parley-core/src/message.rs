//! The Message record: the unit of synchronization.
//!
//! A message is constructed once (locally, via [`Message::new`]) or
//! reconstructed from wire bytes (via [`Message::decode`]) and is immutable
//! after it enters a durable store. Its identity is a pure function of the
//! creation timestamp and the payload, so two peers that construct the same
//! operation at the same instant agree on its fingerprint.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::{decode_message, encode_message};
use crate::error::Result;

/// Domain separation prefix for message fingerprints.
const FINGERPRINT_DOMAIN: &[u8] = b"parley-msg-v0:";

/// A 64-bit message fingerprint.
///
/// Computed as the low 8 bytes (little-endian) of
/// `blake3(domain || timestamp_le || payload)`. 64 bits is enough entropy
/// for divergence detection and keeps the state counter arithmetic cheap;
/// the full digest width buys nothing here.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Create from a little-endian byte representation.
    pub const fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// The little-endian byte representation.
    pub const fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// The raw 64-bit value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Convert to hex string.
    pub fn to_hex(self) -> String {
        hex::encode(self.0.to_le_bytes())
    }

    /// The zero id (used as a sentinel in tests).
    pub const ZERO: Self = Self(0);
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.to_hex())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<u64> for MessageId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// An application-defined operation to be propagated between peers.
///
/// `state_at` is the originating peer's state counter immediately before
/// this message was applied there. It is written exactly once, at
/// application time, by the state counter's `update`; it never participates
/// in the fingerprint because it is unknown at construction time.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    /// Fingerprint of `(timestamp, payload)`.
    pub id: MessageId,

    /// Creation time, Unix milliseconds UTC. Advisory ordering only:
    /// distributed clocks make this a suggestion, not a truth.
    pub timestamp: i64,

    /// The originating peer's state counter before this message applied.
    pub state_at: u64,

    /// Opaque application payload. Parley makes no assumptions about it.
    pub payload: Bytes,
}

impl Message {
    /// Craft a new message around the given payload, stamped with the
    /// current time. Use [`Message::decode`] for messages arriving off the
    /// wire; this constructor is for *new* local operations only.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let timestamp = now_millis();
        let id = Self::fingerprint(timestamp, &payload);
        Self {
            id,
            timestamp,
            state_at: 0,
            payload,
        }
    }

    /// Compute the fingerprint for a `(timestamp, payload)` pair.
    ///
    /// Deterministic: identical inputs always produce identical ids.
    pub fn fingerprint(timestamp: i64, payload: &[u8]) -> MessageId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(FINGERPRINT_DOMAIN);
        hasher.update(&timestamp.to_le_bytes());
        hasher.update(payload);
        let digest = hasher.finalize();
        let mut low = [0u8; 8];
        low.copy_from_slice(&digest.as_bytes()[..8]);
        MessageId::from_le_bytes(low)
    }

    /// Encode to canonical bytes for the wire or disk.
    pub fn encode(&self) -> Vec<u8> {
        encode_message(self)
    }

    /// Reconstruct a message from canonical bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode_message(bytes)
    }

    /// Whether this message was created after `other`. Timestamps only.
    pub fn newer_than(&self, other: &Message) -> bool {
        self.timestamp > other.timestamp
    }

    /// Whether this message was created before `other`. Timestamps only.
    pub fn older_than(&self, other: &Message) -> bool {
        self.timestamp < other.timestamp
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp)
            .field("state_at", &self.state_at)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
