//! # Error Definitions
//!
//! The central ledger of all framing and protocol failures.

use ownpack::Error as PackError;

/// Failures while building or reading a message envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The underlying Ownpack serialization failed (truncation, bad UTF-8, ...).
    Serialization(PackError),
    /// A topic string is empty or not of the form `Interface.Operation`.
    InvalidTopic(String),
    /// An answer carried a code this side does not know.
    UnknownAnswerCode(i32),
    /// The internal structure of the message was malformed (e.g. negative topic length).
    ProtocolViolation(String),
    /// A frame section is larger than the configured cap.
    FrameTooLarge { len: usize, cap: usize },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "serialization failed: {}", e),
            Self::InvalidTopic(t) => write!(f, "invalid topic {:?}", t),
            Self::UnknownAnswerCode(c) => write!(f, "unknown answer code {}", c),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::FrameTooLarge { len, cap } => {
                write!(f, "frame section of {} bytes exceeds cap of {} bytes", len, cap)
            }
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PackError> for RpcError {
    fn from(e: PackError) -> Self { Self::Serialization(e) }
}

/// A specialized Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;
