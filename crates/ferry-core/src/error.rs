use thiserror::Error;

use crate::domain::{TaskId, TaskState, WorkerId};

/// Errors returned by queue operations. None of them is fatal; the queue stays
/// usable after any of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is at capacity ({limit} outstanding tasks)")]
    CapacityExceeded { limit: usize },

    #[error("worker {worker_id} does not hold {task_id} (state={state}, owner={})", .owner.as_ref().map_or("none", WorkerId::as_str))]
    OwnershipMismatch {
        task_id: TaskId,
        worker_id: WorkerId,
        owner: Option<WorkerId>,
        state: TaskState,
    },

    #[error("task not found: {0}")]
    NotFound(TaskId),
}

impl QueueError {
    /// Races the reaper expects and swallows: the worker finished (or the task
    /// was reclaimed) between sweep and recovery.
    pub fn is_expected_race(&self) -> bool {
        matches!(
            self,
            QueueError::OwnershipMismatch { .. } | QueueError::NotFound(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("default_max_attempts must be at least 1")]
    ZeroMaxAttempts,

    #[error("reap_timeout must be greater than zero")]
    ZeroReapTimeout,

    #[error("reap_interval must be greater than zero")]
    ZeroReapInterval,

    #[error("max_outstanding must be greater than zero when set")]
    ZeroCapacity,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn ownership_mismatch_message_names_both_workers() {
        let err = QueueError::OwnershipMismatch {
            task_id: TaskId::from_ulid(Ulid::nil()),
            worker_id: WorkerId::new("late"),
            owner: Some(WorkerId::new("current")),
            state: TaskState::InFlight,
        };
        let msg = err.to_string();
        assert!(msg.contains("late"));
        assert!(msg.contains("owner=current"));
        assert!(msg.contains("in_flight"));
        assert!(err.is_expected_race());
    }

    #[test]
    fn capacity_is_not_a_race() {
        assert!(!QueueError::CapacityExceeded { limit: 1 }.is_expected_race());
        assert!(QueueError::NotFound(TaskId::from_ulid(Ulid::nil())).is_expected_race());
    }
}
