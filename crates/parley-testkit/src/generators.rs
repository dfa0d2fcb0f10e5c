//! Proptest generators for property-based testing.

use proptest::prelude::*;

use parley_core::{Message, MessageId};

/// Generate a random MessageId.
pub fn message_id() -> impl Strategy<Value = MessageId> {
    any::<u64>().prop_map(MessageId)
}

/// Generate a reasonable millisecond timestamp, negatives included.
pub fn timestamp() -> impl Strategy<Value = i64> {
    -1_000i64..=4_102_444_800_000
}

/// Generate a state counter value, biased toward the wraparound edges.
pub fn state() -> impl Strategy<Value = u64> {
    prop_oneof![
        3 => any::<u64>(),
        1 => Just(0u64),
        1 => Just(u64::MAX),
    ]
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a full message with an arbitrary (not derived) id.
pub fn message(max_payload: usize) -> impl Strategy<Value = Message> {
    (message_id(), timestamp(), state(), payload(max_payload)).prop_map(
        |(id, timestamp, state_at, payload)| Message {
            id,
            timestamp,
            state_at,
            payload: payload.into(),
        },
    )
}

/// Generate a message whose id is the real fingerprint of its contents.
pub fn fingerprinted_message(max_payload: usize) -> impl Strategy<Value = Message> {
    (timestamp(), payload(max_payload)).prop_map(|(timestamp, payload)| {
        let id = Message::fingerprint(timestamp, &payload);
        Message {
            id,
            timestamp,
            state_at: 0,
            payload: payload.into(),
        }
    })
}
