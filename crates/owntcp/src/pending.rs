//! Pending-answer table: message id → completion of the request it answers.

use dashmap::DashMap;

use ownrpc::Answer;

use crate::error::Error;
use crate::send_queue::Completion;

#[derive(Default)]
pub struct PendingAnswers {
    waiting: DashMap<u32, Completion>,
}

impl PendingAnswers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: u32, completion: Completion) {
        self.waiting.insert(id, completion);
    }

    pub fn remove(&self, id: u32) -> Option<Completion> {
        self.waiting.remove(&id).map(|(_, completion)| completion)
    }

    /// Resolves the request with id `id`. Negative answers resolve it with
    /// [`Error::Remote`]. Returns `false` if nothing was waiting on `id`.
    pub fn resolve(&self, id: u32, answer: Answer) -> bool {
        let Some(completion) = self.remove(id) else { return false };
        let outcome = if answer.code.is_ok() { Ok(Some(answer)) } else { Err(Error::Remote(answer.code)) };
        completion.complete(outcome);
        true
    }

    /// Fails every waiting request.
    pub fn fail_all(&self, error: Error) {
        let ids: Vec<u32> = self.waiting.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some(completion) = self.remove(id) {
                completion.complete(Err(error.clone()));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}
