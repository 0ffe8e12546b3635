//! # Error Definitions
//!
//! Every failure a communicator can surface. Errors are `Clone` so one fault
//! can be handed to every caller that was waiting on the connection.

use std::fmt;

use ownrpc::AnswerCode;
use ownrpc::RpcError;

#[derive(Debug, Clone)]
pub enum Error {
    /// Socket I/O failed. Always fatal to the connection.
    Io(String),
    /// The peer closed the stream without a close notice.
    ConnectionLost,
    /// Address resolution failed or yielded nothing to connect to.
    Resolve(String),
    /// A frame could not be built or read.
    Rpc(RpcError),
    /// A payload could not be encoded or decoded.
    Pack(ownpack::Error),
    /// The peer answered with a negative code.
    Remote(AnswerCode),
    /// A deadline-bound command got no answer in time.
    Timeout,
    /// The domain handler failed while applying a message.
    Handler { topic: String, message: String },
    /// The connection is closed or closing.
    Closed,
    /// The operation is not valid in the communicator's current state.
    InvalidState(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::ConnectionLost => write!(f, "Connection lost"),
            Self::Resolve(msg) => write!(f, "Could not resolve address: {}", msg),
            Self::Rpc(e) => write!(f, "RPC error: {}", e),
            Self::Pack(e) => write!(f, "Ownpack error: {}", e),
            Self::Remote(code) => write!(f, "Remote answered {:?}", code),
            Self::Timeout => write!(f, "Request timed out"),
            Self::Handler { topic, message } => write!(f, "Handler for {} failed: {}", topic, message),
            Self::Closed => write!(f, "Connection closed"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rpc(e) => Some(e),
            Self::Pack(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Self::Rpc(e)
    }
}

impl From<ownpack::Error> for Error {
    fn from(e: ownpack::Error) -> Self {
        Self::Pack(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

pub type Result<T> = std::result::Result<T, Error>;
