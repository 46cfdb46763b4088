//! Pending queue with stable priority ordering.
//!
//! Entries are kept sorted by `(policy(priority), sequence)`. The sequence
//! number is assigned once at submission, so a retried job goes back to the
//! slot its original key and submission order dictate rather than to the
//! front or the back.

use std::cmp::Ordering;
use std::collections::VecDeque;

use super::{JobId, OrderingPolicy, PriorityKey};

#[derive(Debug, Clone)]
struct QueuedEntry {
    id: JobId,
    priority: PriorityKey,
    sequence: u64,
}

/// Ordered set of jobs waiting for admission.
#[derive(Debug)]
pub struct PendingQueue {
    entries: VecDeque<QueuedEntry>,
    policy: OrderingPolicy,
}

impl PendingQueue {
    pub fn new(policy: OrderingPolicy) -> Self {
        Self {
            entries: VecDeque::new(),
            policy,
        }
    }

    fn order(&self, a: &QueuedEntry, b: &QueuedEntry) -> Ordering {
        self.policy
            .compare(&a.priority, &b.priority)
            .then_with(|| a.sequence.cmp(&b.sequence))
    }

    /// Insert a job at the position its key and sequence dictate.
    pub fn push(&mut self, id: JobId, priority: PriorityKey, sequence: u64) {
        let entry = QueuedEntry {
            id,
            priority,
            sequence,
        };
        let position = self
            .entries
            .partition_point(|queued| self.order(queued, &entry) != Ordering::Greater);
        self.entries.insert(position, entry);
    }

    /// Remove and return the head of the queue.
    pub fn pop(&mut self) -> Option<JobId> {
        self.entries.pop_front().map(|entry| entry.id)
    }

    /// Remove a specific job. Returns whether it was queued.
    pub fn remove(&mut self, id: &JobId) -> bool {
        match self.entries.iter().position(|entry| &entry.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
