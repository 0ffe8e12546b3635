//! # Collaborator Interfaces
//!
//! The transport never interprets domain payloads. It hands received frames
//! to a [`Dispatcher`] and learns about local mutations from a
//! [`ChangeSource`].

use bytes::Bytes;
use ownrpc::Topic;

use crate::events::Subscription;

/// Applies received domain messages and produces/consumes state snapshots.
///
/// # Invariants
/// - `handle` raises the resulting local change events before it returns;
///   events raised later are not recognized as echoes and are sent back out.
/// - Errors are application faults. They close the client session, or the
///   originating connection on a server.
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    /// Applies one domain message.
    async fn handle(&self, topic: &Topic, payload: Option<&[u8]>) -> anyhow::Result<()>;

    /// Serializes the full state for a newly connected client.
    async fn snapshot(&self) -> anyhow::Result<Bytes>;

    /// Replaces local state with a snapshot received from the server.
    async fn apply_snapshot(&self, snapshot: &[u8]) -> anyhow::Result<()>;

    /// Whether `topic` is handled here. Unaccepted topics are answered with
    /// `Unsupported` and never processed or broadcast.
    fn accepts(&self, _topic: &Topic) -> bool {
        true
    }
}

/// A local mutation that peers should learn about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub topic: Topic,
    pub payload: Option<Bytes>,
}

impl Change {
    pub fn new(topic: Topic, payload: Option<Bytes>) -> Self {
        Self { topic, payload }
    }
}

/// Something whose local mutations can be observed.
pub trait ChangeSource: Send + Sync {
    /// Registers `callback` for every change. It is called synchronously from
    /// inside the mutating call.
    fn subscribe_changes(&self, callback: Box<dyn Fn(&Change) + Send + Sync>) -> Subscription;
}
