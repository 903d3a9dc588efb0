//! Events - 状態遷移イベント
//!
//! キューは遷移ごとに TaskEvent を発行し、EventSink に渡します。
//! 整形や配送（ログ、メトリクス）は EventSink 側の責務です。

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{TaskId, WorkerId};

/// Which transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Queued -> InFlight
    Claimed,
    /// InFlight -> Completed
    Completed,
    /// -> Failed
    Failed,
    /// InFlight -> Queued
    Requeued,
}

/// Who drove the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    /// The owning worker (dequeue, complete, fail).
    Worker,
    /// The reaper recovered an expired claim.
    Reaper,
    /// The dequeue guard found a task with no attempts left.
    AttemptsExhausted,
}

/// One state transition.
///
/// Sinks are called after the queue lock is released, so two transitions
/// racing on different threads may reach the sink in either order, even for
/// the same task. `seq` is assigned under the lock and gives the real order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEvent {
    /// Per-queue transition sequence, strictly increasing.
    pub seq: u64,
    pub task_id: TaskId,
    pub transition: Transition,
    pub cause: Cause,
    /// Acting worker, if any.
    pub worker_id: Option<WorkerId>,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}
