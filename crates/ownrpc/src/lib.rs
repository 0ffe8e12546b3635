//! # OwnRPC
//!
//! The envelope every player instance speaks over TCP.
//!
//! ## Architecture
//!
//! A message is `{id, fire-and-forget, topic, payload}`. Transport control uses
//! reserved topics (`-close`, `-ping`, `-ans`, `-sync`); everything else is an
//! `Interface.Operation` topic with an opaque `ownpack` payload that the
//! domain dispatcher understands. This crate knows nothing about sockets.

mod answer;
mod error;
mod message;
mod topic;

#[cfg(test)]
mod tests;

pub use answer::Answer;
pub use answer::AnswerCode;
pub use error::Result;
pub use error::RpcError;
pub use message::Message;
pub use message::PAYLOAD_LEN_LEN;
pub use message::PREFIX_LEN;
pub use message::Prefix;
pub use message::UNASSIGNED_ID;
pub use message::decode_payload_len;
pub use message::decode_topic;
pub use topic::Reserved;
pub use topic::Topic;

pub use bytes::Bytes;
