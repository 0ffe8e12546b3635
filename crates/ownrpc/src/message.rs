//! # Message Envelope
//!
//! The unit that travels over a connection.
//!
//! ## Wire Format
//!
//! ```text
//! [id: u32][fireAndForget: u8][topicLen: i32][topic: topicLen][payloadLen: i32][payload: payloadLen]
//! ```
//!
//! `payloadLen == -1` means no payload; `0` is a present but empty payload.
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - The topic is never empty and never null.
//! - Lengths are validated against a cap before anything is allocated.

use bytes::Bytes;
use ownpack::Decoder;
use ownpack::Encoder;

use crate::answer::Answer;
use crate::error::Result;
use crate::error::RpcError;
use crate::topic::Reserved;
use crate::topic::Topic;

/// Bytes in front of the topic: id, fire-and-forget flag, topic length.
pub const PREFIX_LEN: usize = 4 + 1 + 4;

/// Bytes of the payload length field.
pub const PAYLOAD_LEN_LEN: usize = 4;

/// Id of a message that has not been assigned one yet.
pub const UNASSIGNED_ID: u32 = 0;

/// A framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Assigned by the send loop when the message is written.
    pub id: u32,
    /// True if the sender does not wait for an answer.
    pub fire_and_forget: bool,
    pub topic: String,
    pub payload: Option<Bytes>,
}

impl Message {
    /// A message that expects an answer.
    pub fn request(topic: impl Into<String>, payload: Option<Bytes>) -> Self {
        Self { id: UNASSIGNED_ID, fire_and_forget: false, topic: topic.into(), payload }
    }

    /// A message that does not expect an answer.
    pub fn notify(topic: impl Into<String>, payload: Option<Bytes>) -> Self {
        Self { id: UNASSIGNED_ID, fire_and_forget: true, topic: topic.into(), payload }
    }

    /// A domain message for a structured topic.
    pub fn for_topic(topic: &Topic, payload: Option<Bytes>, fire_and_forget: bool) -> Self {
        Self { id: UNASSIGNED_ID, fire_and_forget, topic: topic.to_wire(), payload }
    }

    /// The answer to message `id`.
    pub fn answer(id: u32, answer: &Answer) -> Result<Self> {
        Ok(Self {
            id,
            fire_and_forget: true,
            topic: Reserved::ANSWER.into(),
            payload: Some(answer.to_bytes()?),
        })
    }

    pub fn close() -> Self {
        Self::notify(Reserved::CLOSE, None)
    }

    pub fn ping() -> Self {
        Self::request(Reserved::PING, None)
    }

    /// The snapshot request (no payload) or reply (snapshot payload).
    pub fn sync(snapshot: Option<Bytes>) -> Self {
        Self::notify(Reserved::SYNC, snapshot)
    }

    /// The reserved topic this message carries, if any.
    pub fn reserved(&self) -> Option<Reserved> {
        Reserved::from_topic(&self.topic)
    }

    /// Parses the topic as `Interface.Operation`.
    pub fn structured_topic(&self) -> Result<Topic> {
        Topic::parse(&self.topic)
    }

    pub fn payload_bytes(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Encode this message into the encoder.
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        if self.topic.is_empty() {
            return Err(RpcError::InvalidTopic(String::new()));
        }
        enc.u32(self.id);
        enc.bool(self.fire_and_forget);
        enc.str(&self.topic)?;
        enc.bytes(self.payload.as_deref())?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes())
    }

    /// Decode a whole message from the decoder.
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let id = dec.u32()?;
        let fire_and_forget = dec.bool()?;
        let topic = dec.str()?;
        if topic.is_empty() {
            return Err(RpcError::InvalidTopic(String::new()));
        }
        let payload = dec.bytes()?.map(Bytes::copy_from_slice);
        Ok(Self { id, fire_and_forget, topic: topic.to_owned(), payload })
    }

    /// Decode a message that must span the whole buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let msg = Self::decode(&mut dec)?;
        dec.finish()?;
        Ok(msg)
    }
}

/// The fixed-size head of a frame, read before the topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    pub id: u32,
    pub fire_and_forget: bool,
    pub topic_len: usize,
}

impl Prefix {
    /// Decodes the frame prefix, rejecting empty or oversized topics.
    pub fn decode(bytes: &[u8; PREFIX_LEN], cap: usize) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let id = dec.u32()?;
        let fire_and_forget = dec.bool()?;
        let topic_len = match dec.i32()? {
            n if n <= 0 => {
                return Err(RpcError::ProtocolViolation(format!("topic length {}", n)));
            }
            n => n as usize,
        };
        if topic_len > cap {
            return Err(RpcError::FrameTooLarge { len: topic_len, cap });
        }
        Ok(Self { id, fire_and_forget, topic_len })
    }
}

/// Decodes the topic section of a frame.
pub fn decode_topic(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| RpcError::Serialization(ownpack::Error::InvalidUtf8))
}

/// Decodes the payload length field; `None` means no payload.
pub fn decode_payload_len(bytes: &[u8; PAYLOAD_LEN_LEN], cap: usize) -> Result<Option<usize>> {
    match i32::from_le_bytes(*bytes) {
        ownpack::NULL_LEN => Ok(None),
        n if n < 0 => Err(RpcError::ProtocolViolation(format!("payload length {}", n))),
        n if n as usize > cap => Err(RpcError::FrameTooLarge { len: n as usize, cap }),
        n => Ok(Some(n as usize)),
    }
}
