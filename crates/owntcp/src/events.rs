//! # Subscriber Lists
//!
//! Explicit, synchronous event fan-out. `emit` calls every subscriber on the
//! emitting thread before returning, which is what lets the topic lock see
//! echoes raised while a received frame is being applied.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use tokio::sync::mpsc;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct List<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// A list of callbacks interested in events of type `T`.
pub struct Subscribers<T> {
    list: Arc<Mutex<List<T>>>,
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self { list: self.list.clone() }
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            list: Arc::new(Mutex::new(List { next_id: 0, entries: Vec::new() })),
        }
    }

    /// Registers a callback. It stays registered until the returned
    /// [`Subscription`] is dropped or detached.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut list = lock(&self.list);
            let id = list.next_id;
            list.next_id += 1;
            list.entries.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<List<T>>> = Arc::downgrade(&self.list);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(list) = weak.upgrade() {
                    lock(&list).entries.retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Calls every subscriber with `event`.
    ///
    /// Callbacks run outside the list lock, so they may subscribe or unsubscribe.
    pub fn emit(&self, event: &T) {
        let callbacks: Vec<Callback<T>> = lock(&self.list)
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in callbacks {
            cb(event);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.list).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + 'static> Subscribers<T> {
    /// Subscribes with a channel, for consumers that would rather await events.
    pub fn channel(&self) -> (Subscription, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.subscribe(move |event: &T| {
            let _ = tx.send(event.clone());
        });
        (sub, rx)
    }
}

fn lock<T>(list: &Mutex<List<T>>) -> std::sync::MutexGuard<'_, List<T>> {
    // A panicking subscriber cannot leave the list half-updated.
    list.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps a callback registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Unsubscribes now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keeps the callback registered for as long as the subscriber list lives.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.cancel.is_some()).finish()
    }
}
