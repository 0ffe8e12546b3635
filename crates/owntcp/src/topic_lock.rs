//! # Topic Lock
//!
//! Applying a remote update raises the same change event a local mutation
//! would, and that event would be serialized and sent straight back. While a
//! received frame is dispatched, its topic and exact payload sit in this table
//! and an identical outbound send is skipped as an echo.
//!
//! ## Invariants
//! - An entry lives only for one dispatch; the [`TopicGuard`] removes it.
//! - Only an identical payload is an echo. A different payload on a locked
//!   topic is a genuine change and goes out.
//! - Locking a topic that is already locked waits until it is released.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;

#[derive(Default)]
pub struct TopicLocks {
    locked: Mutex<HashMap<String, Option<Bytes>>>,
    released: Notify,
}

impl TopicLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<Bytes>>> {
        self.locked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `topic` with `payload` until the guard is dropped.
    pub async fn lock(&self, topic: &str, payload: Option<Bytes>) -> TopicGuard<'_> {
        let mut payload = Some(payload);
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                let mut table = self.table();
                if !table.contains_key(topic) {
                    table.insert(topic.to_string(), payload.take().flatten());
                    return TopicGuard { locks: self, topic: topic.to_string() };
                }
            }

            tracing::trace!(topic, "waiting for topic lock");
            released.await;
        }
    }

    /// True if sending `topic` with `payload` now would echo the frame being applied.
    pub fn is_echo(&self, topic: &str, payload: Option<&[u8]>) -> bool {
        self.table()
            .get(topic)
            .is_some_and(|locked| locked.as_deref() == payload)
    }

    pub fn is_locked(&self, topic: &str) -> bool {
        self.table().contains_key(topic)
    }

    fn unlock(&self, topic: &str) {
        self.table().remove(topic);
        self.released.notify_waiters();
    }
}

/// Holds a topic lock. Dropping it releases the topic and wakes waiters.
pub struct TopicGuard<'a> {
    locks: &'a TopicLocks,
    topic: String,
}

impl TopicGuard<'_> {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for TopicGuard<'_> {
    fn drop(&mut self) {
        self.locks.unlock(&self.topic);
    }
}
