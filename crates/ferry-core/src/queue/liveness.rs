//! Liveness tracking for in-flight tasks.
//!
//! Detection only: `sweep` reports expired claims and changes nothing. The
//! queue decides what to do with them (requeue or fail).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::{TaskId, WorkerId};

/// Current claim on an in-flight task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub worker_id: WorkerId,
    /// Claim time, or the last heartbeat.
    pub claimed_at: DateTime<Utc>,
}

/// An in-flight task whose worker stopped making progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zombie {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub claimed_at: DateTime<Utc>,
}

/// The in-flight set: TaskId -> current claim.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    claims: HashMap<TaskId, Claim>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_claim(&mut self, task_id: TaskId, worker_id: WorkerId, now: DateTime<Utc>) {
        self.claims.insert(
            task_id,
            Claim {
                worker_id,
                claimed_at: now,
            },
        );
    }

    /// Refresh a claim. Returns `false` if the task is not in flight.
    pub fn heartbeat(&mut self, task_id: TaskId, now: DateTime<Utc>) -> bool {
        match self.claims.get_mut(&task_id) {
            Some(claim) => {
                claim.claimed_at = now;
                true
            }
            None => false,
        }
    }

    pub fn release(&mut self, task_id: TaskId) -> Option<Claim> {
        self.claims.remove(&task_id)
    }

    pub fn claim(&self, task_id: TaskId) -> Option<&Claim> {
        self.claims.get(&task_id)
    }

    /// Lazily yield every claim with `now - claimed_at > timeout`.
    ///
    /// Each call is an independent scan; the tracker is not modified.
    pub fn sweep(&self, now: DateTime<Utc>, timeout: Duration) -> impl Iterator<Item = Zombie> + '_ {
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        self.claims
            .iter()
            .filter(move |(_, claim)| now.signed_duration_since(claim.claimed_at) > timeout)
            .map(|(task_id, claim)| Zombie {
                task_id: *task_id,
                worker_id: claim.worker_id.clone(),
                claimed_at: claim.claimed_at,
            })
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}
