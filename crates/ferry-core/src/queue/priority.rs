//! Priority index: which queued task runs next.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::domain::{Priority, TaskId};

/// Heap entry for a queued task.
///
/// Ordering (greatest = served first):
/// 1. higher priority
/// 2. earlier `submitted_at`
/// 3. lower submission sequence (identical timestamps keep FIFO)
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    priority: Priority,
    submitted_at: DateTime<Utc>,
    seq: u64,
    task_id: TaskId,
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Max-heap of queued TaskIds.
///
/// Not synchronized: the owning queue guards it with the same lock as the
/// registry, which is what makes select + claim atomic.
#[derive(Debug, Default)]
pub struct PriorityIndex {
    heap: BinaryHeap<Entry>,
}

impl PriorityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        task_id: TaskId,
        priority: Priority,
        submitted_at: DateTime<Utc>,
        seq: u64,
    ) {
        self.heap.push(Entry {
            priority,
            submitted_at,
            seq,
            task_id,
        });
    }

    /// Remove and return the next task to run.
    pub fn select_next(&mut self) -> Option<TaskId> {
        self.heap.pop().map(|entry| entry.task_id)
    }

    pub fn peek(&self) -> Option<TaskId> {
        self.heap.peek().map(|entry| entry.task_id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, task_id: TaskId) -> bool {
        self.heap.iter().any(|entry| entry.task_id == task_id)
    }
}
