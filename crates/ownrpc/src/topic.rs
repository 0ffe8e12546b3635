//! # Topics
//!
//! Every frame names a topic. Reserved topics start with `-` and drive the
//! transport itself; everything else is an `Interface.Operation` pair that
//! multiplexes a repository channel over the connection.
//!
//! ## Invariants
//! - The interface part never contains `.`, so the first `.` splits a topic
//!   unambiguously even when the operation part contains dots.
//! - Neither part is empty, and the interface never starts with `-`.

use std::fmt;

use crate::error::Result;
use crate::error::RpcError;

/// Transport-level topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reserved {
    /// Orderly shutdown notice; the sender writes nothing after it.
    Close,
    /// Keep-alive request; answered with [`crate::AnswerCode::Ok`].
    Ping,
    /// Answer to the message whose id the frame carries.
    Answer,
    /// Full-state snapshot request (client) and reply (server).
    Sync,
}

impl Reserved {
    pub const CLOSE: &'static str = "-close";
    pub const PING: &'static str = "-ping";
    pub const ANSWER: &'static str = "-ans";
    pub const SYNC: &'static str = "-sync";

    /// The wire form of the topic.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Close => Self::CLOSE,
            Self::Ping => Self::PING,
            Self::Answer => Self::ANSWER,
            Self::Sync => Self::SYNC,
        }
    }

    /// Maps a wire topic onto a reserved topic, if it is one.
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            Self::CLOSE => Some(Self::Close),
            Self::PING => Some(Self::Ping),
            Self::ANSWER => Some(Self::Answer),
            Self::SYNC => Some(Self::Sync),
            _ => None,
        }
    }
}

impl fmt::Display for Reserved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured `(interface, operation)` topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic {
    interface: String,
    operation: String,
}

impl Topic {
    /// Builds a topic, validating both parts.
    pub fn new(interface: impl Into<String>, operation: impl Into<String>) -> Result<Self> {
        let interface = interface.into();
        let operation = operation.into();
        if interface.is_empty() || interface.contains('.') || interface.starts_with('-') {
            return Err(RpcError::InvalidTopic(format!("{}.{}", interface, operation)));
        }
        if operation.is_empty() {
            return Err(RpcError::InvalidTopic(format!("{}.{}", interface, operation)));
        }
        Ok(Self { interface, operation })
    }

    /// Parses the wire form `Interface.Operation`.
    pub fn parse(wire: &str) -> Result<Self> {
        let (interface, operation) = wire
            .split_once('.')
            .ok_or_else(|| RpcError::InvalidTopic(wire.to_string()))?;
        Self::new(interface, operation)
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// The wire form of the topic.
    pub fn to_wire(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.interface, self.operation)
    }
}

impl std::str::FromStr for Topic {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
