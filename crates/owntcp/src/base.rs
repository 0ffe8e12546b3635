//! # Base Communicator
//!
//! The part client and server share: applying received domain messages under
//! the topic lock, and forwarding local changes that are not echoes.

use std::sync::Arc;

use ownrpc::Message;

use crate::error::Error;
use crate::error::Result;
use crate::events::Subscription;
use crate::service::Change;
use crate::service::ChangeSource;
use crate::service::Dispatcher;
use crate::topic_lock::TopicLocks;

pub struct Base {
    locks: Arc<TopicLocks>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Base {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { locks: Arc::new(TopicLocks::new()), dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn locks(&self) -> &Arc<TopicLocks> {
        &self.locks
    }

    /// Dispatches one received domain message with its topic locked, so the
    /// change it raises locally is not sent back out.
    pub async fn process(&self, message: &Message) -> Result<()> {
        let topic = message.structured_topic()?;
        let _guard = self.locks.lock(&message.topic, message.payload.clone()).await;
        tracing::trace!(topic = %message.topic, "dispatching");
        self.dispatcher
            .handle(&topic, message.payload_bytes())
            .await
            .map_err(|e| Error::Handler { topic: message.topic.clone(), message: format!("{:#}", e) })
    }

    /// Calls `forward` for every change `source` raises, except echoes of the
    /// message currently being dispatched.
    pub fn hook(
        &self,
        source: &dyn ChangeSource,
        forward: impl Fn(&Change) + Send + Sync + 'static,
    ) -> Subscription {
        let locks = self.locks.clone();
        source.subscribe_changes(Box::new(move |change: &Change| {
            let wire = change.topic.to_wire();
            if locks.is_echo(&wire, change.payload.as_deref()) {
                tracing::trace!(topic = %wire, "suppressed echo");
                return;
            }
            forward(change);
        }))
    }
}
