//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task state.
///
/// State transitions:
/// - Queued -> InFlight -> Completed
/// - Queued -> InFlight -> Queued (failure or expired claim, attempts remain)
/// - Queued -> InFlight -> Failed (permanent failure or attempts exhausted)
/// - Queued -> Failed (dequeue guard: task can never be attempted again)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Waiting in the priority index.
    Queued,

    /// Claimed by exactly one worker.
    InFlight,

    /// Successfully completed.
    Completed,

    /// Failed permanently.
    Failed,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Is this task eligible for dequeue?
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskState::Queued)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Queued => "queued",
            TaskState::InFlight => "in_flight",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}
