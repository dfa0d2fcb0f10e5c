//! The pull-sync wire protocol: two requests, five replies.
//!
//! Frames are multi-part: an ordered list of byte strings. The first part
//! is always an ASCII tag, later parts carry the tag's arguments. Keeping
//! the envelope this small means a frame can be inspected off the wire
//! with nothing but `xxd`.

use parley_core::Message;

use crate::error::{Result, SyncError};

/// A multi-part wire frame, as handed to and received from a transport.
pub type Frame = Vec<Vec<u8>>;

const TAG_SEND: &[u8] = b"send";
const TAG_OK: &[u8] = b"ok";
const TAG_MSG: &[u8] = b"msg";
const TAG_EMPTY: &[u8] = b"empty";
const TAG_DELETED: &[u8] = b"deleted";
const TAG_ERROR: &[u8] = b"error";
const TAG_UNKNOWN: &[u8] = b"unknown";

/// What went wrong on the listener's side, reported inside an `error`
/// reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReason {
    /// The listener could not read the head of its outbound queue.
    QueueRead,
    /// The listener could not serialize the outbound message.
    Serialize,
    /// The listener could not dequeue an acknowledged message. The
    /// requestor has already applied it, so the peers are now diverged
    /// and the requestor must treat this as fatal.
    Dequeue,
    /// A reason this version of the protocol does not know.
    Other(String),
}

impl ErrorReason {
    fn as_bytes(&self) -> &[u8] {
        match self {
            ErrorReason::QueueRead => b"queue read",
            ErrorReason::Serialize => b"serialize",
            ErrorReason::Dequeue => b"dequeue",
            ErrorReason::Other(reason) => reason.as_bytes(),
        }
    }

    fn parse(bytes: &[u8]) -> Self {
        match bytes {
            b"queue read" => ErrorReason::QueueRead,
            b"serialize" => ErrorReason::Serialize,
            b"dequeue" => ErrorReason::Dequeue,
            other => ErrorReason::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }
}

/// A requestor-to-listener frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// "Give me your next outbound message, or your state if you have
    /// none."
    Send,
    /// "I applied the message you last sent; delete it."
    Ok,
}

impl Request {
    /// Encode for the wire.
    pub fn encode(&self) -> Frame {
        match self {
            Request::Send => vec![TAG_SEND.to_vec()],
            Request::Ok => vec![TAG_OK.to_vec()],
        }
    }

    /// Parse a frame from the wire. Unrecognized tags are `None`; the
    /// listener answers those with [`Reply::Unknown`] instead of failing.
    pub fn parse(frame: &Frame) -> Option<Self> {
        match frame.first().map(Vec::as_slice) {
            Some(TAG_SEND) if frame.len() == 1 => Some(Request::Send),
            Some(TAG_OK) if frame.len() == 1 => Some(Request::Ok),
            _ => None,
        }
    }
}

/// A listener-to-requestor frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A queued message, as encoded bytes. Decoding is left to the
    /// requestor so a corrupt body fails on the side that must react.
    Msg(Vec<u8>),
    /// The queue is empty; here is the listener's state counter for a
    /// convergence check.
    Empty(u64),
    /// The acknowledged message was deleted.
    Deleted,
    /// The listener failed; the reason says how badly.
    Error(ErrorReason),
    /// The listener did not understand the request.
    Unknown,
}

impl Reply {
    /// Encode for the wire.
    pub fn encode(&self) -> Frame {
        match self {
            Reply::Msg(body) => vec![TAG_MSG.to_vec(), body.clone()],
            Reply::Empty(state) => vec![TAG_EMPTY.to_vec(), state.to_le_bytes().to_vec()],
            Reply::Deleted => vec![TAG_DELETED.to_vec()],
            Reply::Error(reason) => vec![TAG_ERROR.to_vec(), reason.as_bytes().to_vec()],
            Reply::Unknown => vec![TAG_UNKNOWN.to_vec()],
        }
    }

    /// Parse a frame from the wire.
    pub fn parse(frame: &Frame) -> Result<Self> {
        let tag = frame
            .first()
            .ok_or_else(|| SyncError::Protocol("empty reply frame".into()))?;

        match (tag.as_slice(), frame.len()) {
            (TAG_MSG, 2) => Ok(Reply::Msg(frame[1].clone())),
            (TAG_EMPTY, 2) => {
                let bytes: [u8; 8] = frame[1].as_slice().try_into().map_err(|_| {
                    SyncError::Protocol(format!(
                        "empty reply carries {} state bytes, want 8",
                        frame[1].len()
                    ))
                })?;
                Ok(Reply::Empty(u64::from_le_bytes(bytes)))
            }
            (TAG_DELETED, 1) => Ok(Reply::Deleted),
            (TAG_ERROR, 2) => Ok(Reply::Error(ErrorReason::parse(&frame[1]))),
            (TAG_UNKNOWN, 1) => Ok(Reply::Unknown),
            (tag, parts) => Err(SyncError::Protocol(format!(
                "unrecognized reply: tag {:?}, {parts} part(s)",
                String::from_utf8_lossy(tag)
            ))),
        }
    }

    /// Build a `msg` reply from a message.
    pub fn from_message(msg: &Message) -> Self {
        Reply::Msg(msg.encode())
    }
}
