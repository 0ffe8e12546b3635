//! # Coalescing Send Queue
//!
//! One outbound queue per connection. Only the newest value per topic needs
//! delivery, so the queue holds at most one pending entry per key.
//!
//! ## Invariants
//! - Enqueuing a key that is already pending replaces its message and hands
//!   back the existing completion, so every caller resolves together.
//! - Dequeue order is the order in which keys were first enqueued.
//! - After [`SendQueue::end`], dequeue drains what is left and then yields
//!   `None`; new enqueues fail with [`Error::Closed`].
//! - Answers are keyed by topic *and* id; two answers never coalesce.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use tokio::io::AsyncWrite;
use tokio::sync::Notify;
use tokio::sync::watch;

use ownrpc::Answer;
use ownrpc::Message;
use ownrpc::Reserved;
use ownrpc::UNASSIGNED_ID;

use crate::connection::FrameWriter;
use crate::error::Error;
use crate::error::Result;
use crate::pending::PendingAnswers;

/// What a sender eventually learns: `Ok(None)` once a fire-and-forget message
/// is written, `Ok(Some(answer))` once a request is answered positively.
pub type SendOutcome = Result<Option<Answer>>;

/// The resolving side of a send. Cloned into every place that may finish it;
/// only the first resolution counts.
#[derive(Clone)]
pub struct Completion {
    tx: Arc<watch::Sender<Option<SendOutcome>>>,
}

impl Completion {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Resolves the send. Returns `false` if it was already resolved.
    pub fn complete(&self, outcome: SendOutcome) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    pub fn is_complete(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn waiter(&self) -> Waiter {
        Waiter { rx: self.tx.subscribe() }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").field("complete", &self.is_complete()).finish()
    }
}

/// The awaiting side of a send.
#[derive(Debug)]
pub struct Waiter {
    rx: watch::Receiver<Option<SendOutcome>>,
}

impl Waiter {
    /// A waiter that is already resolved.
    pub fn resolved(outcome: SendOutcome) -> Self {
        let completion = Completion::new();
        completion.complete(outcome);
        completion.waiter()
    }

    pub async fn wait(mut self) -> SendOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(Error::Closed)),
            // Every completion handle was dropped unresolved.
            Err(_) => Err(Error::Closed),
        }
    }
}

/// A dequeued message with the completion its senders are waiting on.
#[derive(Debug)]
pub struct Outgoing {
    pub message: Message,
    pub completion: Completion,
}

struct Entry {
    message: Message,
    completion: Completion,
}

#[derive(Default)]
struct State {
    order: VecDeque<String>,
    entries: HashMap<String, Entry>,
    ended: bool,
}

#[derive(Default)]
pub struct SendQueue {
    state: Mutex<State>,
    ready: Notify,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues `message`, coalescing with a pending message of the same key.
    pub fn enqueue(&self, message: Message) -> Waiter {
        let key = queue_key(&message);
        let mut state = self.state();
        if state.ended {
            return Waiter::resolved(Err(Error::Closed));
        }

        if let Some(entry) = state.entries.get_mut(&key) {
            // Someone still wants an answer if any coalesced sender did.
            let fire_and_forget = entry.message.fire_and_forget && message.fire_and_forget;
            entry.message = Message { fire_and_forget, ..message };
            return entry.completion.waiter();
        }

        let completion = Completion::new();
        let waiter = completion.waiter();
        state.order.push_back(key.clone());
        state.entries.insert(key, Entry { message, completion });
        drop(state);

        self.ready.notify_one();
        waiter
    }

    /// Waits for the next message. `None` once the queue is ended and empty.
    pub async fn dequeue(&self) -> Option<Outgoing> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                while let Some(key) = state.order.pop_front() {
                    if let Some(entry) = state.entries.remove(&key) {
                        return Some(Outgoing { message: entry.message, completion: entry.completion });
                    }
                }
                if state.ended {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stops accepting messages and wakes every waiting dequeue.
    pub fn end(&self) {
        self.state().ended = true;
        self.ready.notify_waiters();
    }

    /// Drops everything still queued, failing its senders with `error`.
    pub fn fail_remaining(&self, error: Error) {
        let entries: Vec<Entry> = {
            let mut state = self.state();
            state.order.clear();
            state.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.completion.complete(Err(error.clone()));
        }
    }

    pub fn is_ended(&self) -> bool {
        self.state().ended
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The send loop: writes queued messages in order until the queue ends or
    /// a close notice has been written.
    ///
    /// Requests are registered in `pending` (when given) before they are
    /// written, so their answer cannot overtake the registration.
    /// Fire-and-forget sends resolve as soon as they are written. A message
    /// that cannot be framed fails alone; a write error ends the loop.
    pub async fn pump<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut FrameWriter<W>,
        ids: &MessageIds,
        pending: Option<&PendingAnswers>,
    ) -> Result<()> {
        while let Some(Outgoing { mut message, completion }) = self.dequeue().await {
            if message.id == UNASSIGNED_ID {
                message.id = ids.next();
            }
            let pending = pending.filter(|_| !message.fire_and_forget);
            if let Some(pending) = pending {
                pending.insert(message.id, completion.clone());
            }

            match writer.write_message(&message).await {
                Ok(()) => {}
                Err(e @ Error::Rpc(_)) => {
                    tracing::warn!(topic = %message.topic, error = %e, "dropping unframeable message");
                    if let Some(pending) = pending {
                        pending.remove(message.id);
                    }
                    completion.complete(Err(e));
                    continue;
                }
                Err(e) => {
                    if let Some(pending) = pending {
                        pending.remove(message.id);
                    }
                    completion.complete(Err(e.clone()));
                    return Err(e);
                }
            }
            tracing::trace!(id = message.id, topic = %message.topic, "sent");

            if pending.is_none() {
                completion.complete(Ok(None));
            }
            if message.reserved() == Some(Reserved::Close) {
                break;
            }
        }
        Ok(())
    }
}

/// Message ids for one connection. Never hands out [`UNASSIGNED_ID`].
#[derive(Debug)]
pub struct MessageIds {
    next: AtomicU32,
}

impl MessageIds {
    pub fn new() -> Self {
        Self { next: AtomicU32::new(1) }
    }

    pub fn next(&self) -> u32 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != UNASSIGNED_ID {
                return id;
            }
        }
    }
}

impl Default for MessageIds {
    fn default() -> Self {
        Self::new()
    }
}

fn queue_key(message: &Message) -> String {
    match message.reserved() {
        Some(Reserved::Answer) => format!("{}#{}", Reserved::ANSWER, message.id),
        _ => message.topic.clone(),
    }
}
