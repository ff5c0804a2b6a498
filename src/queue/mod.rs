//! Merge queue data structures.
//!
//! A branch's merge queue is a [`QueueSet`]: a priority [`MergeQueue`] that is
//! always drained first and a primary [`MergeQueue`] behind it. Both are FIFO
//! internally. Promote and demote only ever act on the primary queue.

mod list;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PrNumber, PullRequestRef};

pub use list::{Iter, MergeQueue, NodeId, QueueMember};

/// Scheduling conflicts raised by the merge queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The pull request is already queued.
    #[error("pull request {0} is already scheduled")]
    Duplicate(PrNumber),

    /// The pull request cannot be scheduled on this queue.
    #[error("unable to schedule pull request {number}: {reason}")]
    Unschedulable { number: PrNumber, reason: String },
}

impl QueueError {
    /// Numeric code reported alongside the error.
    pub fn code(&self) -> u32 {
        match self {
            QueueError::Duplicate(_) => 10409,
            QueueError::Unschedulable { .. } => 10400,
        }
    }
}

/// Checkpoint form of a [`QueueSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedQueues {
    pub primary: Vec<QueueMember>,
    pub priority: Vec<QueueMember>,
}

impl SerializedQueues {
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.priority.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueSet {
    primary: MergeQueue,
    priority: MergeQueue,
}

impl QueueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a pull request, on the priority queue when `urgent`.
    ///
    /// An urgent push of a pull request waiting in the primary queue moves it
    /// to the priority queue. Any other push of an already queued pull request
    /// is a [`QueueError::Duplicate`].
    pub fn push(&mut self, pr: PullRequestRef, urgent: bool) -> Result<(), QueueError> {
        if self.priority.contains(pr.number) {
            return Err(QueueError::Duplicate(pr.number));
        }
        if urgent {
            self.primary.remove(pr.number);
            self.priority.push(pr)?;
        } else {
            self.primary.push(pr)?;
        }
        Ok(())
    }

    /// Puts a pull request back at the head of the primary queue.
    pub fn requeue_front(&mut self, pr: PullRequestRef) -> Result<(), QueueError> {
        if self.priority.contains(pr.number) {
            return Err(QueueError::Duplicate(pr.number));
        }
        self.primary.push_front(pr).map(|_| ())
    }

    /// Next pull request to process: priority first, then primary.
    pub fn pop(&mut self) -> Option<PullRequestRef> {
        self.priority.pop().or_else(|| self.primary.pop())
    }

    pub fn peek(&self) -> Option<&PullRequestRef> {
        self.priority.peek().or_else(|| self.primary.peek())
    }

    pub fn remove(&mut self, number: PrNumber) -> Option<PullRequestRef> {
        self.primary
            .remove(number)
            .or_else(|| self.priority.remove(number))
    }

    pub fn promote(&mut self, number: PrNumber) -> bool {
        self.primary.promote(number)
    }

    pub fn demote(&mut self, number: PrNumber) -> bool {
        self.primary.demote(number)
    }

    pub fn contains(&self, number: PrNumber) -> bool {
        self.primary.contains(number) || self.priority.contains(number)
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.priority.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.priority.is_empty()
    }

    pub fn primary(&self) -> &MergeQueue {
        &self.primary
    }

    pub fn priority(&self) -> &MergeQueue {
        &self.priority
    }

    pub fn serialize(&self) -> SerializedQueues {
        SerializedQueues {
            primary: self.primary.serialize(),
            priority: self.priority.serialize(),
        }
    }

    pub fn deserialize(serialized: SerializedQueues) -> Result<Self, QueueError> {
        let primary = MergeQueue::deserialize(serialized.primary)?;
        let priority = MergeQueue::deserialize(serialized.priority)?;
        if let Some(shared) = priority.iter().find(|pr| primary.contains(pr.number)) {
            return Err(QueueError::Duplicate(shared.number));
        }
        Ok(QueueSet { primary, priority })
    }
}
